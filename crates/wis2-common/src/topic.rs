//! WIS2 topic hierarchy handling.
//!
//! Dataset identifiers are dotted topic paths
//! (`mw-mw_met_centre.data.core.weather.surface-based-observations.synop`).
//! The broker topic is the directory form under a fixed prefix.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Wis2Error, Wis2Result};

/// Default prefix prepended to every published topic.
pub const DEFAULT_TOPIC_PREFIX: &str = "origin/a/wis2";

/// A validated topic hierarchy held in both dotted and directory forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicHierarchy {
    dotpath: String,
    dirpath: String,
}

impl TopicHierarchy {
    /// Parse either the dotted or the directory form.
    pub fn parse(path: &str) -> Wis2Result<Self> {
        let path = path.trim().trim_matches('/');
        let segments: Vec<&str> = if path.contains('/') {
            path.split('/').collect()
        } else {
            path.split('.').collect()
        };

        if segments.len() < 2 {
            return Err(Wis2Error::InvalidTopic(format!(
                "{}: expected at least a centre and a dataset segment",
                path
            )));
        }
        if let Some(bad) = segments.iter().find(|s| !is_valid_segment(s)) {
            return Err(Wis2Error::InvalidTopic(format!(
                "{}: invalid segment '{}'",
                path, bad
            )));
        }

        Ok(Self {
            dotpath: segments.join("."),
            dirpath: segments.join("/"),
        })
    }

    pub fn dotpath(&self) -> &str {
        &self.dotpath
    }

    pub fn dirpath(&self) -> &str {
        &self.dirpath
    }

    /// Centre identifier (first segment).
    pub fn centre_id(&self) -> &str {
        self.dirpath.split('/').next().unwrap_or_default()
    }

    /// Broker topic under the given prefix.
    pub fn topic(&self, prefix: &str) -> String {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            self.dirpath.clone()
        } else {
            format!("{}/{}", prefix, self.dirpath)
        }
    }
}

impl fmt::Display for TopicHierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotpath)
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
