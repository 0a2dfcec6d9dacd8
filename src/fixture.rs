//! Categories described in JSON, served by a [`ScriptedClient`].
//!
//! Lets the binary run complete sync passes without a real remote API.
//! Times in a fixture (`cache_expiry_ms`, `retry_after_ms`) are offsets from
//! the moment the fixture is served.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::category::SyncCategory;
use crate::reconcile::{contain, Contained, Rules, Snapshot};
use crate::remote::{ErrorKind, RemoteError, RemotePage, ScriptedClient};
use crate::types::{Cursor, Timestamp};

pub type FixtureContent = Contained<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureMode {
    Append,
    Full,
    Hierarchical,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct FixtureRecord {
    pub key: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub body: Value,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FixtureError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub retry_after_ms: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CategoryFixture {
    pub name: String,
    pub mode: FixtureMode,
    #[serde(default)]
    pub always_evolve: bool,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub pages: Vec<Vec<FixtureRecord>>,
    #[serde(default)]
    pub cache_expiry_ms: Option<i64>,
    #[serde(default)]
    pub error: Option<FixtureError>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Fixture {
    pub categories: Vec<CategoryFixture>,
}

impl Fixture {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read fixture {}", path.display()))?;
        let fixture: Fixture = serde_json::from_str(&raw)
            .with_context(|| format!("parse fixture {}", path.display()))?;
        fixture.validate()?;
        Ok(fixture)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for category in &self.categories {
            check_category_name(&category.name)?;
            if !seen.insert(category.name.as_str()) {
                bail!("category {} declared twice", category.name);
            }
            if category.error.is_some() && !category.pages.is_empty() {
                bail!("category {} declares both pages and an error", category.name);
            }
        }
        Ok(())
    }

    pub fn category(&self, name: &str) -> Option<&CategoryFixture> {
        self.categories.iter().find(|c| c.name == name)
    }
}

/// Category names become file names under the state directory, so only
/// ASCII letters, digits, `_` and `-` are accepted.
pub fn check_category_name(name: &str) -> Result<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
    if name.is_empty() || !name.chars().all(allowed) {
        bail!("invalid category name {name:?}: use letters, digits, '_' or '-'");
    }
    Ok(())
}

impl CategoryFixture {
    /// A client that answers one run of this category.
    pub fn client(&self, now: Timestamp) -> ScriptedClient<FixtureRecord> {
        let client = ScriptedClient::new();
        if let Some(error) = &self.error {
            let mut remote = RemoteError {
                kind: error.kind,
                message: error.message.clone(),
                retry_after: None,
            };
            if let Some(ms) = error.retry_after_ms {
                remote = remote.with_retry_after(now + ms);
            }
            client.push_error(remote);
            return client;
        }

        let cache_expiry = self.cache_expiry_ms.map(|ms| now + ms);
        if self.pages.is_empty() {
            client.push_page(RemotePage::last(Vec::new(), cache_expiry));
            return client;
        }
        let last = self.pages.len() - 1;
        for (idx, items) in self.pages.iter().enumerate() {
            let next = (idx < last).then(|| Cursor(idx as i64 + 1));
            client.push_page(RemotePage {
                items: items.clone(),
                cache_expiry,
                next,
            });
        }
        client
    }
}

/// [`SyncCategory`] backed by a fixture declaration.
pub struct FixtureCategory {
    name: String,
    mode: FixtureMode,
    always_evolve: bool,
    prerequisites: Vec<String>,
}

impl From<&CategoryFixture> for FixtureCategory {
    fn from(fixture: &CategoryFixture) -> Self {
        Self {
            name: fixture.name.clone(),
            mode: fixture.mode,
            always_evolve: fixture.always_evolve,
            prerequisites: fixture.prerequisites.clone(),
        }
    }
}

impl SyncCategory for FixtureCategory {
    type Item = FixtureRecord;
    type Key = String;
    type Content = FixtureContent;

    fn name(&self) -> &str {
        &self.name
    }

    fn rules(&self) -> Rules<FixtureContent> {
        let rules = match self.mode {
            FixtureMode::Append => Rules::append_only(),
            FixtureMode::Full => Rules::full(),
            FixtureMode::Hierarchical => Rules::hierarchical(),
        };
        if self.always_evolve {
            rules.always_evolve()
        } else {
            rules
        }
    }

    fn prerequisites(&self) -> Vec<String> {
        self.prerequisites.clone()
    }

    fn snapshot(&self, items: Vec<FixtureRecord>) -> Snapshot<String, FixtureContent> {
        match self.mode {
            FixtureMode::Hierarchical => contain(
                items
                    .into_iter()
                    .map(|record| (record.key, record.parent, record.body))
                    .collect(),
            ),
            FixtureMode::Append | FixtureMode::Full => items
                .into_iter()
                .map(|record| (record.key, Contained::top_level(record.body)))
                .collect(),
        }
    }
}
