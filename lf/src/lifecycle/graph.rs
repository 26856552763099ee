//! Allowed status moves

use std::collections::{HashSet, VecDeque};

use crate::domain::LeadStatus;

/// Statuses a lead may move to directly from `status`
pub fn successors(status: LeadStatus) -> &'static [LeadStatus] {
    use LeadStatus::*;
    match status {
        New => &[Scored, Failed],
        Scored => &[MessageGenerated, Failed],
        MessageGenerated => &[OutreachSent, Failed],
        OutreachSent => &[
            Interested,
            NotInterested,
            WrongPerson,
            NeedsClarification,
            FollowUpDue,
            Failed,
        ],
        Interested => &[SchedulingInProgress, SchedulingFailed, Failed],
        SchedulingInProgress => &[
            MeetingTimeConfirmed,
            NotInterested,
            WrongPerson,
            NeedsClarification,
            Failed,
        ],
        MeetingTimeConfirmed => &[MeetingBooked, BookingFailed, Failed],
        NotInterested | WrongPerson => &[Archived, Failed],
        // the one backward edge: retry outreach in the same thread
        FollowUpDue => &[OutreachSent, FollowUpFailed, Failed],
        NeedsClarification => &[],
        MeetingBooked | BookingFailed | SchedulingFailed | FollowUpFailed | Archived | Failed => &[],
    }
}

pub fn is_successor(from: LeadStatus, to: LeadStatus) -> bool {
    successors(from).contains(&to)
}

/// Whether `target` can be reached from any of `sources` in one or more moves
pub fn reachable_from(sources: &[LeadStatus], target: LeadStatus) -> bool {
    let mut seen: HashSet<LeadStatus> = HashSet::new();
    let mut queue: VecDeque<LeadStatus> = sources.iter().copied().collect();
    while let Some(status) = queue.pop_front() {
        for next in successors(status) {
            if *next == target {
                return true;
            }
            if seen.insert(*next) {
                queue.push_back(*next);
            }
        }
    }
    false
}
