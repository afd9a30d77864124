//! Read-only views derived from a [`FamilySnapshot`].

use chrono::NaiveDate;
use shared::{Appointment, FamilyMember};

use crate::store::FamilySnapshot;

/// Figures shown on the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSummary {
    pub member_count: usize,
    pub active_medications: usize,
    pub vaccine_count: usize,
    /// Appointments on or after today, soonest first.
    pub upcoming: Vec<Appointment>,
    /// Earlier appointments, most recent first.
    pub past: Vec<Appointment>,
    pub is_new_user: bool,
}

impl DashboardSummary {
    pub fn compute(snapshot: &FamilySnapshot, today: NaiveDate) -> Self {
        let (upcoming, past) = split_by_day(&snapshot.appointments, today);
        Self {
            member_count: snapshot.family_members.len(),
            active_medications: snapshot
                .family_members
                .iter()
                .map(|m| m.active_medications().count())
                .sum(),
            vaccine_count: snapshot.family_members.iter().map(|m| m.vaccines.len()).sum(),
            upcoming,
            past,
            is_new_user: snapshot.family_members.is_empty(),
        }
    }

    pub fn next_appointment(&self) -> Option<&Appointment> {
        self.upcoming.first()
    }
}

/// One member's medical record with their appointment history.
#[derive(Debug, Clone, PartialEq)]
pub struct ClinicalHistory {
    pub member: FamilyMember,
    /// All of the member's appointments, newest first.
    pub appointments: Vec<Appointment>,
    pub upcoming: Vec<Appointment>,
    pub past: Vec<Appointment>,
}

impl ClinicalHistory {
    pub fn for_member(snapshot: &FamilySnapshot, member_id: &str, today: NaiveDate) -> Option<Self> {
        let member = snapshot.member(member_id)?.clone();
        let mut appointments: Vec<Appointment> = snapshot
            .appointments
            .iter()
            .filter(|a| a.patient_id == member_id)
            .cloned()
            .collect();
        appointments.sort_by_key(|a| std::cmp::Reverse(a.sort_key()));
        let (upcoming, past) = split_by_day(&appointments, today);
        Some(Self {
            member,
            appointments,
            upcoming,
            past,
        })
    }
}

fn split_by_day(appointments: &[Appointment], today: NaiveDate) -> (Vec<Appointment>, Vec<Appointment>) {
    let (mut upcoming, mut past): (Vec<Appointment>, Vec<Appointment>) =
        appointments.iter().cloned().partition(|a| a.date >= today);
    upcoming.sort_by_key(Appointment::sort_key);
    past.sort_by_key(|a| std::cmp::Reverse(a.sort_key()));
    (upcoming, past)
}
