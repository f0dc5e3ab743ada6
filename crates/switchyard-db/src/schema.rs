//! Embedded schema. Every statement is idempotent so it runs on each open.

pub(crate) const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS orgs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        timezone TEXT NOT NULL DEFAULT 'UTC',
        default_language TEXT
    );

    CREATE TABLE IF NOT EXISTS contacts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        org_id INTEGER NOT NULL REFERENCES orgs(id),
        uuid TEXT NOT NULL UNIQUE,
        name TEXT,
        language TEXT,
        status TEXT NOT NULL DEFAULT 'A',       -- A active, B blocked, S stopped
        created_on TEXT NOT NULL,
        modified_on TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS contact_urns (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        org_id INTEGER NOT NULL REFERENCES orgs(id),
        contact_id INTEGER REFERENCES contacts(id),
        identity TEXT NOT NULL,
        priority INTEGER NOT NULL DEFAULT 1000,
        UNIQUE (org_id, identity)
    );
    CREATE INDEX IF NOT EXISTS idx_contact_urns_contact ON contact_urns(contact_id);

    CREATE TABLE IF NOT EXISTS contact_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        org_id INTEGER NOT NULL REFERENCES orgs(id),
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS contact_group_members (
        group_id INTEGER NOT NULL REFERENCES contact_groups(id),
        contact_id INTEGER NOT NULL REFERENCES contacts(id),
        PRIMARY KEY (group_id, contact_id)
    );
    CREATE INDEX IF NOT EXISTS idx_group_members_contact ON contact_group_members(contact_id);

    CREATE TABLE IF NOT EXISTS contact_fields (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        org_id INTEGER NOT NULL REFERENCES orgs(id),
        field_key TEXT NOT NULL,
        name TEXT NOT NULL,
        value_type TEXT NOT NULL DEFAULT 'T',   -- T text, N number, D datetime
        UNIQUE (org_id, field_key)
    );

    CREATE TABLE IF NOT EXISTS contact_field_values (
        contact_id INTEGER NOT NULL REFERENCES contacts(id),
        field_id INTEGER NOT NULL REFERENCES contact_fields(id),
        value TEXT NOT NULL,
        PRIMARY KEY (contact_id, field_id)
    );

    CREATE TABLE IF NOT EXISTS campaigns (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        org_id INTEGER NOT NULL REFERENCES orgs(id),
        name TEXT NOT NULL,
        group_id INTEGER NOT NULL REFERENCES contact_groups(id),
        is_active INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS campaign_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uuid TEXT NOT NULL UNIQUE,
        campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
        event_type TEXT NOT NULL DEFAULT 'F',   -- F flow, M message
        start_mode TEXT NOT NULL DEFAULT 'I',   -- I interrupt, S skip, P passive
        relative_to_key TEXT NOT NULL,
        start_offset INTEGER NOT NULL,
        unit TEXT NOT NULL,                     -- M minutes, H hours, D days, W weeks
        delivery_hour INTEGER NOT NULL DEFAULT -1,
        flow_id INTEGER,
        is_active INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS event_fires (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id INTEGER NOT NULL REFERENCES campaign_events(id),
        contact_id INTEGER NOT NULL REFERENCES contacts(id),
        scheduled TEXT NOT NULL,
        fired TEXT,
        fired_result TEXT                       -- F fired, S skipped
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_event_fires_unfired
        ON event_fires(event_id, contact_id) WHERE fired IS NULL;
    CREATE INDEX IF NOT EXISTS idx_event_fires_due
        ON event_fires(scheduled) WHERE fired IS NULL;

    CREATE TABLE IF NOT EXISTS broadcasts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        org_id INTEGER NOT NULL REFERENCES orgs(id),
        text TEXT NOT NULL,
        base_language TEXT NOT NULL,
        translations TEXT NOT NULL DEFAULT '{}', -- JSON: language -> text
        status TEXT NOT NULL DEFAULT 'P',        -- P pending, Q queued, S sent
        created_on TEXT NOT NULL,
        modified_on TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS broadcast_contacts (
        broadcast_id INTEGER NOT NULL REFERENCES broadcasts(id),
        contact_id INTEGER NOT NULL REFERENCES contacts(id),
        PRIMARY KEY (broadcast_id, contact_id)
    );

    CREATE TABLE IF NOT EXISTS broadcast_groups (
        broadcast_id INTEGER NOT NULL REFERENCES broadcasts(id),
        group_id INTEGER NOT NULL REFERENCES contact_groups(id),
        PRIMARY KEY (broadcast_id, group_id)
    );

    CREATE TABLE IF NOT EXISTS broadcast_urns (
        broadcast_id INTEGER NOT NULL REFERENCES broadcasts(id),
        urn TEXT NOT NULL,
        PRIMARY KEY (broadcast_id, urn)
    );

    CREATE TABLE IF NOT EXISTS msgs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        org_id INTEGER NOT NULL REFERENCES orgs(id),
        contact_id INTEGER NOT NULL REFERENCES contacts(id),
        broadcast_id INTEGER REFERENCES broadcasts(id),
        urn TEXT NOT NULL,
        text TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'Q',       -- Q queued
        created_on TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_msgs_broadcast_contact
        ON msgs(broadcast_id, contact_id) WHERE broadcast_id IS NOT NULL;

    CREATE TABLE IF NOT EXISTS flow_sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        org_id INTEGER NOT NULL REFERENCES orgs(id),
        contact_id INTEGER NOT NULL REFERENCES contacts(id),
        status TEXT NOT NULL DEFAULT 'W'        -- W waiting, C completed
    );
    CREATE INDEX IF NOT EXISTS idx_flow_sessions_contact ON flow_sessions(contact_id, status);

    CREATE TABLE IF NOT EXISTS queue_tasks (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        queue TEXT NOT NULL,
        task_type TEXT NOT NULL,
        org_id INTEGER NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0,
        body TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending', -- pending, processing, completed, failed
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL DEFAULT 3,
        locked_until TEXT,
        queued_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_queue_tasks_pending
        ON queue_tasks(queue, status, priority DESC, seq);
";
