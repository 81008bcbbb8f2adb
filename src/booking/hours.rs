use crate::config::{BusinessHours, OpeningHours};
use crate::providers::base::{DateRange, Slot};
use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};

/// Opening hours that apply on `date`, if the business opens at all.
pub fn hours_for(hours: &BusinessHours, date: NaiveDate) -> Option<OpeningHours> {
    match date.weekday() {
        Weekday::Sat => hours.saturday,
        Weekday::Sun => hours.sunday,
        _ => hours.weekday,
    }
}

/// Whether the whole slot falls inside the day's opening hours.
pub fn within_hours(hours: &BusinessHours, slot: &Slot) -> bool {
    let Some(open) = hours_for(hours, slot.date) else {
        return false;
    };
    let Some(start) = NaiveTime::from_hms_opt(open.open, 0, 0) else {
        return false;
    };
    let start = slot.date.and_time(start);
    let end = if open.close >= 24 {
        slot.date.succ_opt().map(|d| d.and_hms_opt(0, 0, 0))
    } else {
        Some(slot.date.and_hms_opt(open.close, 0, 0))
    }
    .flatten();
    let Some(end) = end else {
        return false;
    };
    slot.start() >= start && slot.end() <= end
}

/// Every on-the-hour slot inside opening hours across `range`. Used when the
/// calendar cannot be asked.
pub fn business_hours_slots(hours: &BusinessHours, range: &DateRange, duration_minutes: u32) -> Vec<Slot> {
    let mut slots = Vec::new();
    for day in range.days() {
        let Some(open) = hours_for(hours, day) else {
            continue;
        };
        for hour in open.open..open.close.min(24) {
            let Some(time) = NaiveTime::from_hms_opt(hour, 0, 0) else {
                continue;
            };
            let slot = Slot::new(day, time, duration_minutes);
            if within_hours(hours, &slot) {
                slots.push(slot);
            }
        }
    }
    slots
}
