use chrono::NaiveDate;

use crate::model::DateRange;

// ── Blackout arithmetic ───────────────────────────────────────────

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[DateRange]) -> Vec<DateRange> {
    let mut merged: Vec<DateRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= last.end
        {
            last.end = last.end.max(range.end);
            continue;
        }
        merged.push(range);
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted by start; `to_remove` may overlap itself.
pub fn subtract_ranges(base: &[DateRange], to_remove: &[DateRange]) -> Vec<DateRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(DateRange::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(DateRange::new(current_start, current_end));
        }
    }

    result
}

/// Sweep line over per-room occupancy: the dates on which at least
/// `capacity` ranges are held. Returns sorted, merged ranges.
pub fn saturated_ranges(ranges: &[DateRange], capacity: usize) -> Vec<DateRange> {
    if ranges.is_empty() || capacity == 0 {
        return Vec::new();
    }
    if capacity == 1 {
        let mut sorted = ranges.to_vec();
        sorted.sort_by_key(|r| r.start);
        return merge_overlapping(&sorted);
    }

    // -1 sorts before +1 on the same date: checkout frees the night before check-in takes it.
    let mut events: Vec<(NaiveDate, i32)> = Vec::with_capacity(ranges.len() * 2);
    for r in ranges {
        events.push((r.start, 1));
        events.push((r.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result = Vec::new();
    let mut count: usize = 0;
    let mut saturated_start: Option<NaiveDate> = None;

    for &(date, delta) in &events {
        if delta > 0 {
            count += 1;
        } else {
            count = count.saturating_sub(1);
        }

        if count >= capacity && saturated_start.is_none() {
            saturated_start = Some(date);
        } else if count < capacity
            && let Some(start) = saturated_start.take()
            && date > start
        {
            result.push(DateRange::new(start, date));
        }
    }

    merge_overlapping(&result)
}
