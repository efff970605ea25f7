//! The four categorical layers that together identify a patch.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a categorical layer in the composite key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerRole {
    Basin,
    Hillslope,
    Zone,
    Patch,
}

impl LayerRole {
    /// Key order: basin:hillslope:zone:patch.
    pub const ALL: [LayerRole; 4] = [
        LayerRole::Basin,
        LayerRole::Hillslope,
        LayerRole::Zone,
        LayerRole::Patch,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LayerRole::Basin => "basin",
            LayerRole::Hillslope => "hillslope",
            LayerRole::Zone => "zone",
            LayerRole::Patch => "patch",
        }
    }
}

impl fmt::Display for LayerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One value per layer role. Used for paths, open rasters and no-data values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSet<T> {
    pub basin: T,
    pub hillslope: T,
    pub zone: T,
    pub patch: T,
}

impl<T> LayerSet<T> {
    pub fn new(basin: T, hillslope: T, zone: T, patch: T) -> Self {
        Self {
            basin,
            hillslope,
            zone,
            patch,
        }
    }

    pub fn get(&self, role: LayerRole) -> &T {
        match role {
            LayerRole::Basin => &self.basin,
            LayerRole::Hillslope => &self.hillslope,
            LayerRole::Zone => &self.zone,
            LayerRole::Patch => &self.patch,
        }
    }

    pub fn get_mut(&mut self, role: LayerRole) -> &mut T {
        match role {
            LayerRole::Basin => &mut self.basin,
            LayerRole::Hillslope => &mut self.hillslope,
            LayerRole::Zone => &mut self.zone,
            LayerRole::Patch => &mut self.patch,
        }
    }

    /// Iterate in key order.
    pub fn iter(&self) -> impl Iterator<Item = (LayerRole, &T)> {
        LayerRole::ALL.into_iter().map(move |role| (role, self.get(role)))
    }

    pub fn map<U>(self, mut f: impl FnMut(LayerRole, T) -> U) -> LayerSet<U> {
        LayerSet {
            basin: f(LayerRole::Basin, self.basin),
            hillslope: f(LayerRole::Hillslope, self.hillslope),
            zone: f(LayerRole::Zone, self.zone),
            patch: f(LayerRole::Patch, self.patch),
        }
    }

    pub fn by_ref(&self) -> LayerSet<&T> {
        LayerSet {
            basin: &self.basin,
            hillslope: &self.hillslope,
            zone: &self.zone,
            patch: &self.patch,
        }
    }
}
