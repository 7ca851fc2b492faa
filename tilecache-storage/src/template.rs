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

use std::{
    fmt::Display,
    path::{Component, Path},
    str::FromStr,
};

use tilecache_common::error::{Error, Result};

use crate::tile::TileKey;

/// The default File Tier path template.
pub const DEFAULT_PATH_TEMPLATE: &str = "{pid}/{mid}/{zoom}/{x}/{y}";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Provider,
    MapType,
    Zoom,
    X,
    Y,
    Quad,
    Language,
    Labels,
    Unknown(String),
}

impl Token {
    fn parse(name: &str) -> Self {
        let name = name.to_lowercase();
        match name.as_str() {
            "pid" => Self::Provider,
            "mid" => Self::MapType,
            "zoom" | "z" => Self::Zoom,
            "x" => Self::X,
            "y" => Self::Y,
            "quad" => Self::Quad,
            "lng" => Self::Language,
            "lbs" => Self::Labels,
            _ => Self::Unknown(name),
        }
    }

    fn render(&self, tile: &TileKey, out: &mut String) {
        match self {
            Self::Provider => out.push_str(&tile.provider),
            Self::MapType => out.push_str(&tile.map_type),
            Self::Zoom => out.push_str(&tile.zoom.to_string()),
            Self::X => out.push_str(&tile.x.to_string()),
            Self::Y => out.push_str(&tile.y.to_string()),
            Self::Quad => out.push_str(&tile.quad_key()),
            Self::Language => out.push_str(&tile.language),
            Self::Labels => out.push_str(if tile.labels { "le" } else { "ld" }),
            Self::Unknown(name) => out.push_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(Token),
}

/// Derives the short path of a tile from a `{token}` template.
///
/// Tokens are matched case-insensitively:
///
/// | token         | value                                   |
/// |---------------|-----------------------------------------|
/// | `pid`         | provider id                             |
/// | `mid`         | map type id                             |
/// | `zoom`, `z`   | zoom level                              |
/// | `x`, `y`      | tile column and row                     |
/// | `quad`        | quad key                                |
/// | `lng`         | label language                          |
/// | `lbs`         | `le` with labels, `ld` without          |
///
/// Unknown tokens render as their lowercase name. A `{` without a closing `}` is kept literally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a template. Returns a config error if the template is blank, absolute or contains `..`.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let source = template.into();
        if source.trim().is_empty() {
            return Err(Error::config("path template must not be empty"));
        }
        if Path::new(&source)
            .components()
            .any(|c| matches!(c, Component::RootDir | Component::Prefix(_) | Component::ParentDir))
        {
            return Err(
                Error::config("path template must be relative to the tier root").with_context("template", &source)
            );
        }

        let mut segments = vec![];
        let mut rest = source.as_str();
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|i| open + i) else {
                break;
            };
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            segments.push(Segment::Token(Token::parse(&rest[open + 1..close])));
            rest = &rest[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { source, segments })
    }

    /// The template as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Render the short path of `tile`.
    pub fn render(&self, tile: &TileKey) -> String {
        let mut out = String::with_capacity(self.source.len() + 16);
        for segment in self.segments.iter() {
            match segment {
                Segment::Literal(literal) => out.push_str(literal),
                Segment::Token(token) => token.render(tile, &mut out),
            }
        }
        out
    }
}

impl Default for PathTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_PATH_TEMPLATE.to_string(),
            segments: vec![
                Segment::Token(Token::Provider),
                Segment::Literal("/".to_string()),
                Segment::Token(Token::MapType),
                Segment::Literal("/".to_string()),
                Segment::Token(Token::Zoom),
                Segment::Literal("/".to_string()),
                Segment::Token(Token::X),
                Segment::Literal("/".to_string()),
                Segment::Token(Token::Y),
            ],
        }
    }
}

impl FromStr for PathTemplate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl Display for PathTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile() -> TileKey {
        TileKey::new("osm", "mapnik", 3, 4, 5).with_language("en")
    }

    #[test]
    fn test_default_template() {
        assert_eq!(PathTemplate::default(), PathTemplate::new(DEFAULT_PATH_TEMPLATE).unwrap());
        assert_eq!(PathTemplate::default().render(&tile()), "osm/mapnik/3/4/5");
    }

    #[test]
    fn test_all_tokens() {
        let template: PathTemplate = "{PID}_{Mid}/{z}-{ZOOM}/{quad}/{x}.{y}/{lng}/{lbs}".parse().unwrap();
        assert_eq!(template.render(&tile()), "osm_mapnik/3-3/302/4.5/en/le");
        assert_eq!(
            template.render(&tile().with_labels(false)),
            "osm_mapnik/3-3/302/4.5/en/ld"
        );
    }

    #[test]
    fn test_unknown_and_unbalanced() {
        let template = PathTemplate::new("tiles/{Custom}/{x}/{y").unwrap();
        assert_eq!(template.render(&tile()), "tiles/custom/4/{y");
        assert_eq!(template.to_string(), "tiles/{Custom}/{x}/{y");

        assert_eq!(PathTemplate::new("{}").unwrap().render(&tile()), "");
        assert!(PathTemplate::new("  ").is_err());
    }

    #[test]
    fn test_reject_escaping_templates() {
        for template in ["/srv/tiles/{x}", "{pid}/../{x}", "../{pid}/{x}", "tiles/{z}/.."] {
            let err = PathTemplate::new(template).unwrap_err();
            assert_eq!(err.kind(), tilecache_common::error::ErrorKind::Config, "{template}");
        }
        assert_eq!(
            PathTemplate::new("{pid}/..hidden/{x}").unwrap().render(&tile()),
            "osm/..hidden/4"
        );
    }
}
