//! CLI commands over the family record: members, medications, vaccines,
//! appointments and the derived views.

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Subcommand, ValueEnum};
use famcare::store::{FamilySnapshot, FamilyStore};
use famcare::views::{ClinicalHistory, DashboardSummary};
use shared::{
    AgeUnit, Appointment, AppointmentPatch, FamilyMember, FamilyMemberPatch, MedicationPatch,
    MedicationStatus, MemberType, NewAppointment, NewFamilyMember, NewMedication, NewVaccine,
    VaccinePatch,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Adult,
    Child,
    Elder,
}

impl From<KindArg> for MemberType {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Adult => MemberType::Adult,
            KindArg::Child => MemberType::Child,
            KindArg::Elder => MemberType::Elder,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AgeUnitArg {
    Years,
    Months,
}

impl From<AgeUnitArg> for AgeUnit {
    fn from(unit: AgeUnitArg) -> Self {
        match unit {
            AgeUnitArg::Years => AgeUnit::Years,
            AgeUnitArg::Months => AgeUnit::Months,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Active,
    Inactive,
}

impl From<StatusArg> for MedicationStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Active => MedicationStatus::Active,
            StatusArg::Inactive => MedicationStatus::Inactive,
        }
    }
}

#[derive(Subcommand)]
pub enum MemberAction {
    /// Add a family member
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        relation: String,
        #[arg(long)]
        age: Option<u32>,
        #[arg(long, value_enum, default_value = "years")]
        age_unit: AgeUnitArg,
        #[arg(long, default_value = "")]
        role: String,
        #[arg(long = "type", value_enum, default_value = "adult")]
        kind: KindArg,
        #[arg(long)]
        blood_type: Option<String>,
        #[arg(long)]
        doc_type: Option<String>,
        #[arg(long)]
        doc_number: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        height: Option<String>,
        #[arg(long)]
        weight: Option<String>,
        /// Not born yet; age and identity document are ignored
        #[arg(long)]
        prenatal: bool,
    },
    /// Update a member's profile fields
    Update {
        /// Member id or name
        member: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        relation: Option<String>,
        #[arg(long)]
        age: Option<u32>,
        #[arg(long, value_enum)]
        age_unit: Option<AgeUnitArg>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        height: Option<String>,
        #[arg(long)]
        weight: Option<String>,
        #[arg(long)]
        blood_type: Option<String>,
    },
    /// Set a member's photo URL
    Photo { member: String, url: String },
    /// Remove a member with their medications, vaccines and appointments
    Remove { member: String },
}

#[derive(Subcommand)]
pub enum MedAction {
    Add {
        member: String,
        name: String,
        #[arg(long, default_value = "")]
        dosage: String,
        #[arg(long, default_value = "")]
        frequency: String,
        #[arg(long, value_enum, default_value = "active")]
        status: StatusArg,
    },
    Update {
        member: String,
        medication: String,
        #[arg(long)]
        dosage: Option<String>,
        #[arg(long)]
        frequency: Option<String>,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
    Remove { member: String, medication: String },
}

#[derive(Subcommand)]
pub enum VaccineAction {
    Add {
        member: String,
        name: String,
        /// Date given (YYYY-MM-DD)
        date: NaiveDate,
    },
    Update {
        member: String,
        vaccine: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    Remove { member: String, vaccine: String },
}

#[derive(Subcommand)]
pub enum AppointmentAction {
    /// Schedule an appointment
    Add {
        /// Patient member id or name
        patient: String,
        #[arg(long)]
        doctor: String,
        #[arg(long, default_value = "")]
        specialty: String,
        #[arg(long)]
        date: NaiveDate,
        /// HH:MM
        #[arg(long)]
        time: String,
        #[arg(long, default_value = "")]
        location: String,
    },
    /// Record the clinical outcome or reschedule
    Record {
        appointment: String,
        #[arg(long)]
        diagnosis: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        weight: Option<String>,
        #[arg(long)]
        height: Option<String>,
        #[arg(long)]
        document_url: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        time: Option<String>,
    },
    Remove { appointment: String },
}

/// Finds a member by id, or by name ignoring case.
fn resolve_member<'a>(snapshot: &'a FamilySnapshot, key: &str) -> Result<&'a FamilyMember> {
    snapshot
        .member(key)
        .or_else(|| {
            snapshot
                .family_members
                .iter()
                .find(|m| m.name.eq_ignore_ascii_case(key))
        })
        .ok_or_else(|| anyhow!("No family member matches '{}'", key))
}

fn require_user(snapshot: &FamilySnapshot) -> Result<()> {
    if snapshot.user.is_none() {
        anyhow::bail!("Not signed in. Run 'famcare login' first.");
    }
    Ok(())
}

pub fn list_members(store: &FamilyStore) -> Result<()> {
    let snapshot = store.snapshot();
    require_user(&snapshot)?;
    if snapshot.family_members.is_empty() {
        println!("No family members yet. Add one with 'famcare member add --name <name>'.");
        return Ok(());
    }
    for member in &snapshot.family_members {
        println!(
            "{}  {} ({}, {})  blood: {}",
            member.id,
            member.name,
            if member.relation.is_empty() { "-" } else { member.relation.as_str() },
            member.age_label(),
            member.blood_type.as_deref().unwrap_or("-"),
        );
        for med in &member.medications {
            println!("    med {}  {} {} every {} [{:?}]", med.id, med.name, med.dosage, med.frequency, med.status);
        }
        for vaccine in &member.vaccines {
            let date = vaccine.date.map(|d| d.to_string()).unwrap_or_else(|| "unknown date".to_string());
            println!("    vaccine {}  {} on {}", vaccine.id, vaccine.name, date);
        }
    }
    Ok(())
}

pub async fn member(store: &FamilyStore, action: MemberAction) -> Result<()> {
    let snapshot = store.snapshot();
    require_user(&snapshot)?;
    match action {
        MemberAction::Add {
            name,
            relation,
            age,
            age_unit,
            role,
            kind,
            blood_type,
            doc_type,
            doc_number,
            phone,
            height,
            weight,
            prenatal,
        } => {
            let draft = NewFamilyMember {
                name,
                relation,
                age,
                age_unit: age_unit.into(),
                role,
                member_type: kind.into(),
                blood_type,
                doc_type,
                doc_number,
                phone,
                height,
                weight,
                is_prenatal: prenatal,
                avatar: None,
            };
            let member = store.add_member(draft).await?;
            println!("\x1b[32m✓ Added {} ({})\x1b[0m", member.name, member.id);
        }
        MemberAction::Update {
            member,
            name,
            relation,
            age,
            age_unit,
            phone,
            height,
            weight,
            blood_type,
        } => {
            let id = resolve_member(&snapshot, &member)?.id.clone();
            let patch = FamilyMemberPatch {
                name,
                relation,
                age,
                age_unit: age_unit.map(Into::into),
                phone,
                height,
                weight,
                blood_type,
            };
            store.update_member(&id, patch).await?;
            println!("Updated");
        }
        MemberAction::Photo { member, url } => {
            let id = resolve_member(&snapshot, &member)?.id.clone();
            store.update_member_photo(&id, &url).await?;
            println!("Photo updated");
        }
        MemberAction::Remove { member } => {
            let found = resolve_member(&snapshot, &member)?;
            let (id, name) = (found.id.clone(), found.name.clone());
            store.delete_member(&id).await?;
            println!("Removed {}", name);
        }
    }
    Ok(())
}

pub async fn medication(store: &FamilyStore, action: MedAction) -> Result<()> {
    let snapshot = store.snapshot();
    require_user(&snapshot)?;
    match action {
        MedAction::Add {
            member,
            name,
            dosage,
            frequency,
            status,
        } => {
            let id = resolve_member(&snapshot, &member)?.id.clone();
            let draft = NewMedication {
                name,
                dosage,
                frequency,
                status: status.into(),
            };
            let med = store.add_medication(&id, draft).await?;
            println!("\x1b[32m✓ Added {} ({})\x1b[0m", med.name, med.id);
        }
        MedAction::Update {
            member,
            medication,
            dosage,
            frequency,
            status,
        } => {
            let id = resolve_member(&snapshot, &member)?.id.clone();
            let patch = MedicationPatch {
                dosage,
                frequency,
                status: status.map(Into::into),
            };
            store.update_medication(&id, &medication, patch).await?;
            println!("Updated");
        }
        MedAction::Remove { member, medication } => {
            let id = resolve_member(&snapshot, &member)?.id.clone();
            store.delete_medication(&id, &medication).await?;
            println!("Removed");
        }
    }
    Ok(())
}

pub async fn vaccine(store: &FamilyStore, action: VaccineAction) -> Result<()> {
    let snapshot = store.snapshot();
    require_user(&snapshot)?;
    match action {
        VaccineAction::Add { member, name, date } => {
            let id = resolve_member(&snapshot, &member)?.id.clone();
            let vaccine = store.add_vaccine(&id, NewVaccine { name, date }).await?;
            println!("\x1b[32m✓ Added {} ({})\x1b[0m", vaccine.name, vaccine.id);
        }
        VaccineAction::Update {
            member,
            vaccine,
            name,
            date,
        } => {
            let id = resolve_member(&snapshot, &member)?.id.clone();
            store
                .update_vaccine(&id, &vaccine, VaccinePatch { name, date })
                .await?;
            println!("Updated");
        }
        VaccineAction::Remove { member, vaccine } => {
            let id = resolve_member(&snapshot, &member)?.id.clone();
            store.delete_vaccine(&id, &vaccine).await?;
            println!("Removed");
        }
    }
    Ok(())
}

fn print_appointment(a: &Appointment) {
    println!(
        "{}  {} {}  {} ({})  {}  at {}",
        a.id, a.date, a.time, a.doctor, a.specialty, a.patient_name, a.location
    );
    if let Some(diagnosis) = &a.diagnosis {
        println!("    diagnosis: {}", diagnosis);
    }
    if let Some(notes) = &a.notes {
        println!("    notes: {}", notes);
    }
    if let Some(url) = &a.document_url {
        println!("    document: {}", url);
    }
}

pub fn list_appointments(store: &FamilyStore) -> Result<()> {
    let snapshot = store.snapshot();
    require_user(&snapshot)?;
    if snapshot.appointments.is_empty() {
        println!("No appointments");
    }
    snapshot.appointments.iter().for_each(print_appointment);
    Ok(())
}

pub async fn appointment(store: &FamilyStore, action: AppointmentAction) -> Result<()> {
    let snapshot = store.snapshot();
    require_user(&snapshot)?;
    match action {
        AppointmentAction::Add {
            patient,
            doctor,
            specialty,
            date,
            time,
            location,
        } => {
            let patient_id = resolve_member(&snapshot, &patient)?.id.clone();
            let appointment = store
                .add_appointment(NewAppointment {
                    doctor,
                    specialty,
                    date,
                    time,
                    location,
                    patient_id,
                })
                .await?;
            print_appointment(&appointment);
        }
        AppointmentAction::Record {
            appointment,
            diagnosis,
            notes,
            weight,
            height,
            document_url,
            date,
            time,
        } => {
            let patch = AppointmentPatch {
                date,
                time,
                diagnosis,
                weight,
                height,
                notes,
                document_url,
                ..Default::default()
            };
            store.update_appointment(&appointment, patch).await?;
            println!("Updated");
        }
        AppointmentAction::Remove { appointment } => {
            store.delete_appointment(&appointment).await?;
            println!("Removed");
        }
    }
    Ok(())
}

pub fn summary(store: &FamilyStore, today: NaiveDate) -> Result<()> {
    let snapshot = store.snapshot();
    require_user(&snapshot)?;
    let summary = DashboardSummary::compute(&snapshot, today);
    if summary.is_new_user {
        println!("Welcome! Start by adding a family member with 'famcare member add --name <name>'.");
        return Ok(());
    }
    println!("members:            {}", summary.member_count);
    println!("active medications: {}", summary.active_medications);
    println!("vaccines:           {}", summary.vaccine_count);
    println!("upcoming visits:    {}", summary.upcoming.len());
    println!("past visits:        {}", summary.past.len());
    if let Some(next) = summary.next_appointment() {
        print!("next: ");
        print_appointment(next);
    }
    Ok(())
}

pub fn history(store: &FamilyStore, member: &str, today: NaiveDate) -> Result<()> {
    let snapshot = store.snapshot();
    require_user(&snapshot)?;
    let id = resolve_member(&snapshot, member)?.id.clone();
    let history = ClinicalHistory::for_member(&snapshot, &id, today)
        .ok_or_else(|| anyhow!("No family member matches '{}'", member))?;

    let m = &history.member;
    println!("{} ({}), {}", m.name, m.relation, m.age_label());
    println!(
        "blood: {}  height: {}  weight: {}",
        m.blood_type.as_deref().unwrap_or("-"),
        m.height.as_deref().unwrap_or("-"),
        m.weight.as_deref().unwrap_or("-"),
    );
    println!("active medications: {}", m.active_medications().count());
    println!("vaccines: {}", m.vaccines.len());
    println!();
    if history.appointments.is_empty() {
        println!("No appointments");
    }
    history.appointments.iter().for_each(print_appointment);
    Ok(())
}
