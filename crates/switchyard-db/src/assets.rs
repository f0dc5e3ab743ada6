//! Per-tenant read-only snapshot used by hooks, schedulers and batch workers.

use std::collections::HashMap;

use chrono_tz::Tz;
use rusqlite::Connection;

use switchyard_core::{OrgId, Result};

use crate::campaigns::{CampaignSet, load_campaigns};
use crate::contacts::{ContactField, load_fields};
use crate::orgs::{Org, load_org};

/// Org, active campaigns and field definitions of one tenant.
#[derive(Debug, Clone)]
pub struct OrgAssets {
    pub org: Org,
    pub campaigns: CampaignSet,
    pub fields: HashMap<String, ContactField>,
}

impl OrgAssets {
    pub fn load(conn: &Connection, org_id: OrgId) -> Result<Self> {
        let org = load_org(conn, org_id)?;
        let campaigns = load_campaigns(conn, org_id)?;
        let fields = load_fields(conn, org_id)?;
        Ok(Self {
            org,
            campaigns,
            fields,
        })
    }

    pub fn org_id(&self) -> OrgId {
        self.org.id
    }

    pub fn timezone(&self) -> Tz {
        self.org.timezone
    }

    pub fn field(&self, key: &str) -> Option<&ContactField> {
        self.fields.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::contacts::{FieldType, create_field};
    use crate::orgs::create_org;

    #[test]
    fn test_load_assets() {
        let db = Database::open_in_memory().unwrap();
        let assets = db
            .with_conn(|c| {
                let org = create_org(c, "Nyaruka", "America/New_York", None)?;
                create_field(c, org, "due_date", "Due Date", FieldType::Datetime)?;
                OrgAssets::load(c, org)
            })
            .unwrap();
        assert_eq!(assets.timezone(), chrono_tz::America::New_York);
        assert!(assets.campaigns.is_empty());
        assert_eq!(assets.field("due_date").map(|f| f.value_type), Some(FieldType::Datetime));
        assert!(assets.field("missing").is_none());
    }
}
