use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// Account
// ============================================================================

/// The signed-in account owner, as held by the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Admin,
    Member,
}

// ============================================================================
// Family members
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberType {
    #[default]
    Adult,
    Child,
    Elder,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeUnit {
    #[default]
    Years,
    Months,
}

/// A person whose medical record is managed by the administrator account.
///
/// `age` is `None` for prenatal members; the age is not meaningful until birth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyMember {
    pub id: String,
    pub name: String,
    pub relation: String,
    pub age: Option<u32>,
    pub age_unit: AgeUnit,
    pub role: String,
    #[serde(rename = "type")]
    pub member_type: MemberType,
    pub blood_type: Option<String>,
    pub doc_type: Option<String>,
    pub doc_number: Option<String>,
    pub phone: Option<String>,
    pub height: Option<String>,
    pub weight: Option<String>,
    pub is_prenatal: bool,
    pub avatar: Option<String>,
    #[serde(default)]
    pub medications: Vec<Medication>,
    #[serde(default)]
    pub vaccines: Vec<Vaccine>,
}

impl FamilyMember {
    /// Human readable age, e.g. "7 months" or "Prenatal".
    pub fn age_label(&self) -> String {
        if self.is_prenatal {
            return "Prenatal".to_string();
        }
        match (self.age, self.age_unit) {
            (Some(age), AgeUnit::Months) => format!("{} months", age),
            (Some(age), AgeUnit::Years) => format!("{} years", age),
            (None, _) => "-".to_string(),
        }
    }

    pub fn active_medications(&self) -> impl Iterator<Item = &Medication> {
        self.medications
            .iter()
            .filter(|m| m.status == MedicationStatus::Active)
    }
}

/// Form input for a new family member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFamilyMember {
    pub name: String,
    pub relation: String,
    pub age: Option<u32>,
    pub age_unit: AgeUnit,
    pub role: String,
    #[serde(rename = "type")]
    pub member_type: MemberType,
    pub blood_type: Option<String>,
    pub doc_type: Option<String>,
    pub doc_number: Option<String>,
    pub phone: Option<String>,
    pub height: Option<String>,
    pub weight: Option<String>,
    pub is_prenatal: bool,
    pub avatar: Option<String>,
}

impl NewFamilyMember {
    /// Applies the prenatal rule: no age and no identity document.
    pub fn normalized(mut self) -> Self {
        if self.is_prenatal {
            self.age = None;
            self.doc_type = None;
            self.doc_number = None;
        }
        if self.role.trim().is_empty() {
            self.role = "Member".to_string();
        }
        self
    }
}

/// Partial update of a family member's profile fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyMemberPatch {
    pub name: Option<String>,
    pub relation: Option<String>,
    pub age: Option<u32>,
    pub age_unit: Option<AgeUnit>,
    pub phone: Option<String>,
    pub height: Option<String>,
    pub weight: Option<String>,
    pub blood_type: Option<String>,
}

impl FamilyMemberPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, member: &mut FamilyMember) {
        if let Some(name) = &self.name {
            member.name = name.clone();
        }
        if let Some(relation) = &self.relation {
            member.relation = relation.clone();
        }
        if let Some(age) = self.age {
            if !member.is_prenatal {
                member.age = Some(age);
            }
        }
        if let Some(unit) = self.age_unit {
            member.age_unit = unit;
        }
        if let Some(phone) = &self.phone {
            member.phone = Some(phone.clone());
        }
        if let Some(height) = &self.height {
            member.height = Some(height.clone());
        }
        if let Some(weight) = &self.weight {
            member.weight = Some(weight.clone());
        }
        if let Some(blood_type) = &self.blood_type {
            member.blood_type = Some(blood_type.clone());
        }
    }
}

// ============================================================================
// Medications and vaccines
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicationStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub id: String,
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub status: MedicationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewMedication {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub status: MedicationStatus,
}

/// Only dosage, frequency and status are editable once a medication exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedicationPatch {
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub status: Option<MedicationStatus>,
}

impl MedicationPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, medication: &mut Medication) {
        if let Some(dosage) = &self.dosage {
            medication.dosage = dosage.clone();
        }
        if let Some(frequency) = &self.frequency {
            medication.frequency = frequency.clone();
        }
        if let Some(status) = self.status {
            medication.status = status;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vaccine {
    pub id: String,
    pub name: String,
    /// Missing on rows written without a date.
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVaccine {
    pub name: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VaccinePatch {
    pub name: Option<String>,
    pub date: Option<NaiveDate>,
}

impl VaccinePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, vaccine: &mut Vaccine) {
        if let Some(name) = &self.name {
            vaccine.name = name.clone();
        }
        if let Some(date) = self.date {
            vaccine.date = Some(date);
        }
    }
}

// ============================================================================
// Appointments
// ============================================================================

/// Patient name shown when the referenced member cannot be resolved.
pub const UNKNOWN_PATIENT: &str = "Unknown";

/// A medical appointment for one family member.
///
/// `patient_name` is a display cache resolved at creation or read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub doctor: String,
    pub specialty: String,
    pub date: NaiveDate,
    pub time: String,
    pub location: String,
    pub patient_id: String,
    pub patient_name: String,
    pub diagnosis: Option<String>,
    pub weight: Option<String>,
    pub height: Option<String>,
    pub notes: Option<String>,
    pub document_url: Option<String>,
}

impl Appointment {
    /// Sort key combining date and the "HH:MM" time string.
    pub fn sort_key(&self) -> (NaiveDate, String) {
        (self.date, self.time.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAppointment {
    pub doctor: String,
    pub specialty: String,
    pub date: NaiveDate,
    pub time: String,
    pub location: String,
    pub patient_id: String,
}

/// Clinical record and schedule changes for an appointment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPatch {
    pub doctor: Option<String>,
    pub specialty: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub location: Option<String>,
    pub diagnosis: Option<String>,
    pub weight: Option<String>,
    pub height: Option<String>,
    pub notes: Option<String>,
    pub document_url: Option<String>,
}

impl AppointmentPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, appointment: &mut Appointment) {
        if let Some(doctor) = &self.doctor {
            appointment.doctor = doctor.clone();
        }
        if let Some(specialty) = &self.specialty {
            appointment.specialty = specialty.clone();
        }
        if let Some(date) = self.date {
            appointment.date = date;
        }
        if let Some(time) = &self.time {
            appointment.time = time.clone();
        }
        if let Some(location) = &self.location {
            appointment.location = location.clone();
        }
        if let Some(diagnosis) = &self.diagnosis {
            appointment.diagnosis = Some(diagnosis.clone());
        }
        if let Some(weight) = &self.weight {
            appointment.weight = Some(weight.clone());
        }
        if let Some(height) = &self.height {
            appointment.height = Some(height.clone());
        }
        if let Some(notes) = &self.notes {
            appointment.notes = Some(notes.clone());
        }
        if let Some(url) = &self.document_url {
            appointment.document_url = Some(url.clone());
        }
    }
}
