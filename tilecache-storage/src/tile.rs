// Copyright 2026 tilecache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Identity of one map tile request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileKey {
    /// Provider id, e.g. `osm`.
    pub provider: String,
    /// Map type id of the provider, e.g. `mapnik`.
    pub map_type: String,
    /// Zoom level.
    pub zoom: u8,
    /// Tile column.
    pub x: u32,
    /// Tile row.
    pub y: u32,
    /// Label language, empty if the map type has none.
    pub language: String,
    /// Whether labels are rendered into the tile.
    pub labels: bool,
}

impl TileKey {
    /// Create a key with no language and labels on.
    pub fn new(provider: impl Into<String>, map_type: impl Into<String>, zoom: u8, x: u32, y: u32) -> Self {
        Self {
            provider: provider.into(),
            map_type: map_type.into(),
            zoom,
            x,
            y,
            language: String::new(),
            labels: true,
        }
    }

    /// Set the label language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set whether labels are rendered.
    pub fn with_labels(mut self, labels: bool) -> Self {
        self.labels = labels;
        self
    }

    /// The Bing-style quad key of the tile, one digit per zoom level. Empty at zoom 0.
    pub fn quad_key(&self) -> String {
        (1..=self.zoom)
            .rev()
            .map(|level| {
                let mask = 1u32.checked_shl(level as u32 - 1).unwrap_or(0);
                let mut digit = b'0';
                if self.x & mask != 0 {
                    digit += 1;
                }
                if self.y & mask != 0 {
                    digit += 2;
                }
                digit as char
            })
            .collect()
    }
}

/// Renders the memory tier key: every field that changes the payload takes part.
impl Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}/{}/{}/{}",
            self.provider, self.map_type, self.zoom, self.x, self.y
        )?;
        if !self.language.is_empty() {
            write!(f, "/{}", self.language)?;
        }
        if !self.labels {
            write!(f, "/nolabels")?;
        }
        Ok(())
    }
}
