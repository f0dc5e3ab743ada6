//! Campaigns and their events.
//!
//! Events are owned by their campaign and refer back to it by id only;
//! [`CampaignSet`] keeps the index that resolves an event to its campaign.

use std::collections::HashMap;

use rusqlite::{Connection, params};

use switchyard_core::{CampaignEventId, CampaignId, FlowId, GroupId, OrgId, Result, SwitchyardError};

/// Reference key meaning "relative to when the contact was created".
pub const CREATED_ON_KEY: &str = "created_on";

/// What happens to a contact's active flow when the event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Interrupt whatever the contact is doing.
    Interrupt,
    /// Skip contacts already in a flow.
    Skip,
    /// Start without interrupting.
    Passive,
}

impl StartMode {
    pub fn code(&self) -> &'static str {
        match self {
            StartMode::Interrupt => "I",
            StartMode::Skip => "S",
            StartMode::Passive => "P",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "I" => Ok(StartMode::Interrupt),
            "S" => Ok(StartMode::Skip),
            "P" => Ok(StartMode::Passive),
            other => Err(SwitchyardError::Data(format!("unknown start mode '{other}'"))),
        }
    }
}

/// Offset unit. Unknown codes survive loading and fail per computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffsetUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Unknown(String),
}

impl OffsetUnit {
    pub fn code(&self) -> &str {
        match self {
            OffsetUnit::Minutes => "M",
            OffsetUnit::Hours => "H",
            OffsetUnit::Days => "D",
            OffsetUnit::Weeks => "W",
            OffsetUnit::Unknown(code) => code,
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code {
            "M" => OffsetUnit::Minutes,
            "H" => OffsetUnit::Hours,
            "D" => OffsetUnit::Days,
            "W" => OffsetUnit::Weeks,
            other => OffsetUnit::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Flow,
    Message,
}

impl EventType {
    pub fn code(&self) -> &'static str {
        match self {
            EventType::Flow => "F",
            EventType::Message => "M",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "F" => Ok(EventType::Flow),
            "M" => Ok(EventType::Message),
            other => Err(SwitchyardError::Data(format!("unknown event type '{other}'"))),
        }
    }
}

/// One scheduled step of a campaign.
#[derive(Debug, Clone)]
pub struct CampaignEvent {
    pub id: CampaignEventId,
    pub uuid: String,
    pub campaign_id: CampaignId,
    pub event_type: EventType,
    pub start_mode: StartMode,
    /// `created_on` or a contact field key.
    pub relative_to_key: String,
    pub offset: i64,
    pub unit: OffsetUnit,
    /// Hour of day (0..=23) in the org timezone, `None` when unset.
    pub delivery_hour: Option<u32>,
    pub flow_id: Option<FlowId>,
}

#[derive(Debug, Clone)]
pub struct Campaign {
    pub id: CampaignId,
    pub org_id: OrgId,
    pub name: String,
    pub group_id: GroupId,
    /// Ordered by reference key, then offset.
    pub events: Vec<CampaignEvent>,
}

/// The active campaigns of one org with an event → campaign index.
#[derive(Debug, Clone, Default)]
pub struct CampaignSet {
    campaigns: HashMap<CampaignId, Campaign>,
    by_event: HashMap<CampaignEventId, CampaignId>,
}

impl CampaignSet {
    pub fn new(campaigns: Vec<Campaign>) -> Self {
        let mut set = Self::default();
        for campaign in campaigns {
            for event in &campaign.events {
                set.by_event.insert(event.id, campaign.id);
            }
            set.campaigns.insert(campaign.id, campaign);
        }
        set
    }

    pub fn campaign(&self, id: CampaignId) -> Option<&Campaign> {
        self.campaigns.get(&id)
    }

    /// Resolve an event and its owning campaign.
    pub fn event(&self, id: CampaignEventId) -> Option<(&Campaign, &CampaignEvent)> {
        let campaign = self.campaigns.get(self.by_event.get(&id)?)?;
        let event = campaign.events.iter().find(|e| e.id == id)?;
        Some((campaign, event))
    }

    /// Every (campaign, event) pair, campaigns in id order.
    pub fn events(&self) -> Vec<(&Campaign, &CampaignEvent)> {
        let mut campaigns: Vec<&Campaign> = self.campaigns.values().collect();
        campaigns.sort_by_key(|c| c.id);
        campaigns
            .into_iter()
            .flat_map(|c| c.events.iter().map(move |e| (c, e)))
            .collect()
    }

    /// Events whose reference key is `key`.
    pub fn events_for_key(&self, key: &str) -> Vec<(&Campaign, &CampaignEvent)> {
        self.events()
            .into_iter()
            .filter(|(_, e)| e.relative_to_key == key)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }
}

/// Load active campaigns and their active events for an org.
pub fn load_campaigns(conn: &Connection, org_id: OrgId) -> Result<CampaignSet> {
    let mut stmt = conn.prepare(
        "SELECT id, name, group_id FROM campaigns WHERE org_id = ?1 AND is_active = 1 ORDER BY id",
    )?;
    let mut campaigns: Vec<Campaign> = stmt
        .query_map(params![org_id], |row| {
            Ok(Campaign {
                id: row.get(0)?,
                org_id,
                name: row.get(1)?,
                group_id: row.get(2)?,
                events: Vec::new(),
            })
        })?
        .collect::<rusqlite::Result<_>>()?;

    let mut stmt = conn.prepare(
        "SELECT e.id, e.uuid, e.campaign_id, e.event_type, e.start_mode, e.relative_to_key,
                e.start_offset, e.unit, e.delivery_hour, e.flow_id
         FROM campaign_events e JOIN campaigns c ON c.id = e.campaign_id
         WHERE c.org_id = ?1 AND c.is_active = 1 AND e.is_active = 1
         ORDER BY e.relative_to_key, e.start_offset, e.id",
    )?;
    let rows = stmt.query_map(params![org_id], |row| {
        Ok((
            row.get::<_, CampaignEventId>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, CampaignId>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, i64>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, i64>(8)?,
            row.get::<_, Option<FlowId>>(9)?,
        ))
    })?;

    for row in rows {
        let (id, uuid, campaign_id, event_type, start_mode, key, offset, unit, hour, flow_id) = row?;
        let event = CampaignEvent {
            id,
            uuid,
            campaign_id,
            event_type: EventType::from_code(&event_type)?,
            start_mode: StartMode::from_code(&start_mode)?,
            relative_to_key: key,
            offset,
            unit: OffsetUnit::from_code(&unit),
            delivery_hour: delivery_hour_from_db(hour),
            flow_id,
        };
        if let Some(campaign) = campaigns.iter_mut().find(|c| c.id == campaign_id) {
            campaign.events.push(event);
        }
    }

    tracing::debug!("📣 Loaded {} campaigns for org {}", campaigns.len(), org_id);
    Ok(CampaignSet::new(campaigns))
}

fn delivery_hour_from_db(raw: i64) -> Option<u32> {
    u32::try_from(raw).ok().filter(|h| *h < 24)
}

pub fn create_campaign(conn: &Connection, org_id: OrgId, name: &str, group_id: GroupId) -> Result<CampaignId> {
    conn.execute(
        "INSERT INTO campaigns (org_id, name, group_id) VALUES (?1, ?2, ?3)",
        params![org_id, name, group_id],
    )?;
    Ok(CampaignId(conn.last_insert_rowid()))
}

/// Fields of a new campaign event.
#[derive(Debug, Clone)]
pub struct NewCampaignEvent {
    pub campaign_id: CampaignId,
    pub event_type: EventType,
    pub start_mode: StartMode,
    pub relative_to_key: String,
    pub offset: i64,
    pub unit: OffsetUnit,
    pub delivery_hour: Option<u32>,
    pub flow_id: Option<FlowId>,
}

pub fn create_campaign_event(conn: &Connection, event: &NewCampaignEvent) -> Result<CampaignEventId> {
    let hour: i64 = event.delivery_hour.map(i64::from).unwrap_or(-1);
    conn.execute(
        "INSERT INTO campaign_events
            (uuid, campaign_id, event_type, start_mode, relative_to_key, start_offset, unit, delivery_hour, flow_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            uuid::Uuid::new_v4().to_string(),
            event.campaign_id,
            event.event_type.code(),
            event.start_mode.code(),
            event.relative_to_key,
            event.offset,
            event.unit.code(),
            hour,
            event.flow_id,
        ],
    )?;
    Ok(CampaignEventId(conn.last_insert_rowid()))
}

/// Mark an event inactive. Its pending fires are removed by the caller.
pub fn deactivate_campaign_event(conn: &Connection, id: CampaignEventId) -> Result<()> {
    conn.execute(
        "UPDATE campaign_events SET is_active = 0 WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}
