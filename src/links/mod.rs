//! Link catalogs shown on the dashboard (Rundeck projects, Dynatrace views).

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::storage::{from_db_time, to_db_time, Pool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Rundeck,
    Dynatrace,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Rundeck => "rundeck",
            LinkKind::Dynatrace => "dynatrace",
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rundeck" => Ok(LinkKind::Rundeck),
            "dynatrace" => Ok(LinkKind::Dynatrace),
            other => anyhow::bail!("unknown link kind '{}'", other),
        }
    }
}

/// A named link.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub name: String,
    pub link: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LinkCatalog {
    pool: Pool,
}

impl LinkCatalog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Add a link. Name and URL are trimmed and lowercased; both must be
    /// unique within a kind.
    pub fn add(&self, kind: LinkKind, name: &str, link: &str) -> Result<Link> {
        let name = name.trim().to_lowercase();
        let link = link.trim().to_lowercase();
        if name.is_empty() || link.is_empty() {
            anyhow::bail!("link name and URL must not be empty");
        }

        let now = Utc::now();
        let ts = to_db_time(now);
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO links (kind, name, link, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![kind.as_str(), name, link, ts],
        )
        .with_context(|| format!("Failed to add {} link '{}'", kind, name))?;

        Ok(Link {
            name,
            link,
            created_at: now,
            updated_at: now,
        })
    }

    /// All links of one kind, by name.
    pub fn list(&self, kind: LinkKind) -> Result<Vec<Link>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT name, link, created_at, updated_at FROM links WHERE kind = ?1 ORDER BY name",
        )?;

        let rows = stmt.query_map(params![kind.as_str()], |row| {
            Ok(Link {
                name: row.get(0)?,
                link: row.get(1)?,
                created_at: from_db_time(2, &row.get::<_, String>(2)?)?,
                updated_at: from_db_time(3, &row.get::<_, String>(3)?)?,
            })
        })?;

        let mut links = Vec::new();
        for r in rows {
            links.push(r?);
        }
        Ok(links)
    }
}
