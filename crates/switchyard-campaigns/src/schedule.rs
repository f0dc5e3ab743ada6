//! Fire-time computation for one (campaign event, contact) pair.
//!
//! Pure functions: no storage, no clock. The caller passes `now` and the org
//! timezone.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};

use switchyard_core::{Result, SwitchyardError};
use switchyard_db::campaigns::{CREATED_ON_KEY, Campaign, CampaignEvent, OffsetUnit};
use switchyard_db::contacts::{Contact, FieldValue};

/// When `event` fires for `contact`, or `None` if it never does.
///
/// `None` when the contact is outside the campaign group, has no datetime
/// value for the reference field, or the computed time is not after `now`.
pub fn schedule_for_contact<Tz: TimeZone>(
    tz: &Tz,
    now: DateTime<Utc>,
    contact: &Contact,
    campaign: &Campaign,
    event: &CampaignEvent,
) -> Result<Option<DateTime<Utc>>> {
    if !contact.in_group(campaign.group_id) {
        return Ok(None);
    }

    let start = if event.relative_to_key == CREATED_ON_KEY {
        contact.created_on
    } else {
        match contact.fields.get(&event.relative_to_key) {
            Some(FieldValue::Datetime(value)) => *value,
            _ => return Ok(None),
        }
    };

    schedule_for_time(tz, now, start, event)
}

/// Apply the event's offset and delivery hour to `start` in the org timezone.
pub fn schedule_for_time<Tz: TimeZone>(
    tz: &Tz,
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    event: &CampaignEvent,
) -> Result<Option<DateTime<Utc>>> {
    let local = round_up_to_minute(start.with_timezone(tz));

    let overflow = || {
        SwitchyardError::Data(format!(
            "offset {} {} overflows for event {}",
            event.offset,
            event.unit.code(),
            event.id
        ))
    };

    let offset_local = match &event.unit {
        OffsetUnit::Minutes => local
            .checked_add_signed(Duration::try_minutes(event.offset).ok_or_else(overflow)?)
            .ok_or_else(overflow)?,
        OffsetUnit::Hours => local
            .checked_add_signed(Duration::try_hours(event.offset).ok_or_else(overflow)?)
            .ok_or_else(overflow)?,
        OffsetUnit::Days => add_calendar_days(tz, &local, event.offset).ok_or_else(overflow)?,
        OffsetUnit::Weeks => {
            let days = event.offset.checked_mul(7).ok_or_else(overflow)?;
            add_calendar_days(tz, &local, days).ok_or_else(overflow)?
        }
        OffsetUnit::Unknown(code) => {
            return Err(SwitchyardError::Data(format!(
                "unknown offset unit '{code}' on event {}",
                event.id
            )));
        }
    };

    let scheduled = match event.delivery_hour {
        Some(hour) => {
            let naive = offset_local
                .date_naive()
                .and_hms_opt(hour, 0, 0)
                .ok_or_else(|| SwitchyardError::Data(format!("invalid delivery hour {hour}")))?;
            resolve_local(tz, naive).ok_or_else(overflow)?
        }
        None => offset_local,
    };

    let scheduled = scheduled.with_timezone(&Utc);
    if scheduled <= now {
        return Ok(None);
    }
    Ok(Some(scheduled))
}

/// Next whole local minute unless already on one.
fn round_up_to_minute<Tz: TimeZone>(t: DateTime<Tz>) -> DateTime<Tz> {
    if t.second() == 0 && t.nanosecond() == 0 {
        return t;
    }
    let bumped = t + Duration::seconds(60);
    bumped
        .with_second(0)
        .and_then(|b| b.with_nanosecond(0))
        .unwrap_or(bumped)
}

/// Same wall-clock time `days` calendar days later (or earlier).
fn add_calendar_days<Tz: TimeZone>(tz: &Tz, local: &DateTime<Tz>, days: i64) -> Option<DateTime<Tz>> {
    let naive = local
        .naive_local()
        .checked_add_signed(Duration::try_days(days)?)?;
    resolve_local(tz, naive)
}

/// Map a wall-clock time to an instant. Ambiguous times take the earlier
/// instant, times inside a DST gap move past the gap.
fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive).earliest().or_else(|| {
        let shifted = naive.checked_add_signed(Duration::hours(1))?;
        tz.from_local_datetime(&shifted).earliest()
    })
}
