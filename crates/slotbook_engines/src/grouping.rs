#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use slotbook_contracts::booking::{normalize_client_name, BookingRecord, ReferenceCode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingGroup<T> {
    pub reference_code: ReferenceCode,
    pub members: Vec<T>,
}

/// Rows partitioned by reference code. Rows without a usable code are manual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grouped<T> {
    pub groups: Vec<BookingGroup<T>>,
    pub manual: Vec<T>,
}

impl<T> Grouped<T> {
    pub fn reference_codes(&self) -> impl Iterator<Item = &ReferenceCode> {
        self.groups.iter().map(|g| &g.reference_code)
    }

    pub fn row_count(&self) -> usize {
        self.manual.len() + self.groups.iter().map(|g| g.members.len()).sum::<usize>()
    }
}

/// Groups keep first-appearance order, as do members within a group.
pub fn group_by_reference<T, F>(rows: Vec<T>, code_of: F) -> Grouped<T>
where
    F: Fn(&T) -> Option<&ReferenceCode>,
{
    let mut groups: Vec<BookingGroup<T>> = Vec::new();
    let mut slot_of: HashMap<ReferenceCode, usize> = HashMap::new();
    let mut manual = Vec::new();
    for row in rows {
        let Some(code) = code_of(&row).cloned() else {
            manual.push(row);
            continue;
        };
        match slot_of.get(&code) {
            Some(&i) => groups[i].members.push(row),
            None => {
                slot_of.insert(code.clone(), groups.len());
                groups.push(BookingGroup {
                    reference_code: code,
                    members: vec![row],
                });
            }
        }
    }
    Grouped { groups, manual }
}

/// One seat inside a booking group: the primary row, or a joiner by name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupMember {
    Primary,
    Joiner(String),
}

impl GroupMember {
    pub fn of(record: &BookingRecord) -> Self {
        if record.joiner {
            GroupMember::Joiner(normalize_client_name(&record.client_name))
        } else {
            GroupMember::Primary
        }
    }
}

/// Keeps, per member, only the row with the highest sequence number.
/// Survivors stay in input order.
pub fn latest_per_member<T, M, S>(rows: Vec<T>, member_of: M, seq_of: S) -> Vec<T>
where
    M: Fn(&T) -> GroupMember,
    S: Fn(&T) -> u64,
{
    let mut latest: HashMap<GroupMember, (u64, usize)> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        let seq = seq_of(row);
        latest
            .entry(member_of(row))
            .and_modify(|best| {
                if seq > best.0 {
                    *best = (seq, i);
                }
            })
            .or_insert((seq, i));
    }
    let keep: HashSet<usize> = latest.into_values().map(|(_, i)| i).collect();
    rows.into_iter()
        .enumerate()
        .filter(|(i, _)| keep.contains(i))
        .map(|(_, row)| row)
        .collect()
}
