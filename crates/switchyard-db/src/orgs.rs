//! Tenant (org) records.

use chrono_tz::Tz;
use rusqlite::{Connection, OptionalExtension, params};

use switchyard_core::{OrgId, Result, SwitchyardError};

/// An org as seen by the workers.
#[derive(Debug, Clone)]
pub struct Org {
    pub id: OrgId,
    pub name: String,
    pub timezone: Tz,
    pub default_language: Option<String>,
}

/// Create an org. Rejects timezones chrono-tz does not know.
pub fn create_org(
    conn: &Connection,
    name: &str,
    timezone: &str,
    default_language: Option<&str>,
) -> Result<OrgId> {
    parse_timezone(timezone)?;
    conn.execute(
        "INSERT INTO orgs (name, timezone, default_language) VALUES (?1, ?2, ?3)",
        params![name, timezone, default_language],
    )?;
    Ok(OrgId(conn.last_insert_rowid()))
}

/// Load one org.
pub fn load_org(conn: &Connection, id: OrgId) -> Result<Org> {
    let row: Option<(String, String, Option<String>)> = conn
        .query_row(
            "SELECT name, timezone, default_language FROM orgs WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let (name, timezone, default_language) = row.ok_or(SwitchyardError::NotFound {
        entity: "org",
        id: id.as_i64(),
    })?;

    Ok(Org {
        id,
        name,
        timezone: parse_timezone(&timezone)?,
        default_language,
    })
}

fn parse_timezone(raw: &str) -> Result<Tz> {
    raw.parse::<Tz>()
        .map_err(|e| SwitchyardError::Data(format!("invalid org timezone '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[test]
    fn test_create_and_load_org() {
        let db = Database::open_in_memory().unwrap();
        let org = db
            .with_conn(|c| {
                let id = create_org(c, "Nyaruka", "Africa/Kigali", Some("eng"))?;
                load_org(c, id)
            })
            .unwrap();
        assert_eq!(org.name, "Nyaruka");
        assert_eq!(org.timezone, chrono_tz::Africa::Kigali);
        assert_eq!(org.default_language.as_deref(), Some("eng"));
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let db = Database::open_in_memory().unwrap();
        let result = db.with_conn(|c| create_org(c, "Bad", "Mars/Olympus", None));
        assert!(matches!(result, Err(SwitchyardError::Data(_))));
    }

    #[test]
    fn test_missing_org() {
        let db = Database::open_in_memory().unwrap();
        let result = db.with_conn(|c| load_org(c, OrgId(99)));
        assert!(matches!(result, Err(SwitchyardError::NotFound { entity: "org", id: 99 })));
    }
}
