//! Remote row shapes. Column names are snake_case on the backend and map to
//! the camelCase local models (`blood_type` -> `bloodType`, `avatar_url` -> `avatar`,
//! `patient_id` -> `patientId`, ...).

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::models::{
    AgeUnit, Appointment, AppointmentPatch, FamilyMember, FamilyMemberPatch, MedicationPatch,
    MemberType, Medication, MedicationStatus, NewAppointment, NewFamilyMember, NewMedication,
    NewVaccine, Role, User, Vaccine, VaccinePatch, UNKNOWN_PATIENT,
};

/// Collection names on the remote store.
pub mod tables {
    pub const PROFILES: &str = "profiles";
    pub const FAMILY_MEMBERS: &str = "family_members";
    pub const MEDICATIONS: &str = "medications";
    pub const VACCINES: &str = "vaccines";
    pub const APPOINTMENTS: &str = "appointments";
}

/// Select string for members with their nested medications and vaccines.
pub const MEMBER_WITH_CHILDREN: &str = "*, medications(*), vaccines(*)";
/// Select string for appointments with the patient's name joined in.
pub const APPOINTMENT_WITH_PATIENT: &str = "*, family_members(name)";

// ============================================================================
// Read rows
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

impl From<ProfileRow> for User {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            first_name: row.first_name.unwrap_or_default(),
            last_name: row.last_name.unwrap_or_default(),
            email: row.email.unwrap_or_default(),
            role: row.role.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyMemberRow {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub relation: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub age_unit: Option<AgeUnit>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(rename = "type", default)]
    pub member_type: Option<MemberType>,
    #[serde(default)]
    pub blood_type: Option<String>,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub doc_number: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub height: Option<String>,
    #[serde(default)]
    pub weight: Option<String>,
    #[serde(default)]
    pub is_prenatal: Option<bool>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_rows")]
    pub medications: Vec<MedicationRow>,
    #[serde(default, deserialize_with = "lenient_rows")]
    pub vaccines: Vec<VaccineRow>,
}

impl From<FamilyMemberRow> for FamilyMember {
    fn from(row: FamilyMemberRow) -> Self {
        let is_prenatal = row.is_prenatal.unwrap_or(false);
        Self {
            id: row.id,
            name: row.name.unwrap_or_default(),
            relation: row.relation.unwrap_or_default(),
            age: if is_prenatal { None } else { row.age },
            age_unit: row.age_unit.unwrap_or_default(),
            role: row.role.unwrap_or_default(),
            member_type: row.member_type.unwrap_or_default(),
            blood_type: row.blood_type,
            doc_type: non_empty(row.doc_type),
            doc_number: non_empty(row.doc_number),
            phone: row.phone,
            height: row.height,
            weight: row.weight,
            is_prenatal,
            avatar: row.avatar_url,
            medications: row.medications.into_iter().map(Medication::from).collect(),
            vaccines: row.vaccines.into_iter().map(Vaccine::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationRow {
    pub id: String,
    #[serde(default)]
    pub member_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub status: Option<MedicationStatus>,
}

impl From<MedicationRow> for Medication {
    fn from(row: MedicationRow) -> Self {
        Self {
            id: row.id,
            name: row.name.unwrap_or_default(),
            dosage: row.dosage.unwrap_or_default(),
            frequency: row.frequency.unwrap_or_default(),
            status: row.status.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaccineRow {
    pub id: String,
    #[serde(default)]
    pub member_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl From<VaccineRow> for Vaccine {
    fn from(row: VaccineRow) -> Self {
        Self {
            id: row.id,
            name: row.name.unwrap_or_default(),
            date: row.date,
        }
    }
}

/// Embedded `family_members(name)` relation on an appointment row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientRef {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentRow {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub patient_id: String,
    #[serde(default)]
    pub doctor: Option<String>,
    #[serde(default)]
    pub specialty: Option<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub weight: Option<String>,
    #[serde(default)]
    pub height: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub document_url: Option<String>,
    #[serde(default)]
    pub family_members: Option<PatientRef>,
}

impl AppointmentRow {
    /// Converts the row, taking the patient name from the embedded relation
    /// or, failing that, from `fallback_name`.
    pub fn into_appointment(self, fallback_name: Option<&str>) -> Appointment {
        let patient_name = self
            .family_members
            .and_then(|p| p.name)
            .or_else(|| fallback_name.map(str::to_string))
            .unwrap_or_else(|| UNKNOWN_PATIENT.to_string());
        Appointment {
            id: self.id,
            doctor: self.doctor.unwrap_or_default(),
            specialty: self.specialty.unwrap_or_default(),
            date: self.date,
            time: self.time.unwrap_or_default(),
            location: self.location.unwrap_or_default(),
            patient_id: self.patient_id,
            patient_name,
            diagnosis: self.diagnosis,
            weight: self.weight,
            height: self.height,
            notes: self.notes,
            document_url: self.document_url,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Decodes rows one by one, skipping the ones that do not fit `T`.
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.get("id").cloned().unwrap_or(Value::Null);
            match serde_json::from_value(row) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Skipping malformed row");
                    None
                }
            }
        })
        .collect()
}

/// Embedded child rows: a null relation is empty and bad rows are skipped.
fn lenient_rows<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let rows = Option::<Vec<Value>>::deserialize(deserializer)?;
    Ok(decode_rows(rows.unwrap_or_default()))
}

// ============================================================================
// Write payloads
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileInsert {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyMemberInsert {
    pub user_id: String,
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
    pub avatar_url: Option<String>,
}

impl FamilyMemberInsert {
    /// Builds the insert payload from an already normalized draft.
    pub fn new(user_id: &str, draft: &NewFamilyMember) -> Self {
        Self {
            user_id: user_id.to_string(),
            name: draft.name.clone(),
            relation: draft.relation.clone(),
            age: draft.age,
            age_unit: draft.age_unit,
            role: draft.role.clone(),
            member_type: draft.member_type,
            blood_type: draft.blood_type.clone(),
            doc_type: draft.doc_type.clone(),
            doc_number: draft.doc_number.clone(),
            phone: draft.phone.clone(),
            height: draft.height.clone(),
            weight: draft.weight.clone(),
            is_prenatal: draft.is_prenatal,
            avatar_url: draft.avatar.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FamilyMemberUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_unit: Option<AgeUnit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blood_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl From<&FamilyMemberPatch> for FamilyMemberUpdate {
    fn from(patch: &FamilyMemberPatch) -> Self {
        Self {
            name: patch.name.clone(),
            relation: patch.relation.clone(),
            age: patch.age,
            age_unit: patch.age_unit,
            phone: patch.phone.clone(),
            height: patch.height.clone(),
            weight: patch.weight.clone(),
            blood_type: patch.blood_type.clone(),
            avatar_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationInsert {
    pub member_id: String,
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub status: MedicationStatus,
}

impl MedicationInsert {
    pub fn new(member_id: &str, draft: &NewMedication) -> Self {
        Self {
            member_id: member_id.to_string(),
            name: draft.name.clone(),
            dosage: draft.dosage.clone(),
            frequency: draft.frequency.clone(),
            status: draft.status,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedicationUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MedicationStatus>,
}

impl From<&MedicationPatch> for MedicationUpdate {
    fn from(patch: &MedicationPatch) -> Self {
        Self {
            dosage: patch.dosage.clone(),
            frequency: patch.frequency.clone(),
            status: patch.status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaccineInsert {
    pub member_id: String,
    pub name: String,
    pub date: NaiveDate,
}

impl VaccineInsert {
    pub fn new(member_id: &str, draft: &NewVaccine) -> Self {
        Self {
            member_id: member_id.to_string(),
            name: draft.name.clone(),
            date: draft.date,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaccineUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

impl From<&VaccinePatch> for VaccineUpdate {
    fn from(patch: &VaccinePatch) -> Self {
        Self {
            name: patch.name.clone(),
            date: patch.date,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentInsert {
    pub user_id: String,
    pub patient_id: String,
    pub doctor: String,
    pub specialty: String,
    pub date: NaiveDate,
    pub time: String,
    pub location: String,
}

impl AppointmentInsert {
    pub fn new(user_id: &str, draft: &NewAppointment) -> Self {
        Self {
            user_id: user_id.to_string(),
            patient_id: draft.patient_id.clone(),
            doctor: draft.doctor.clone(),
            specialty: draft.specialty.clone(),
            date: draft.date,
            time: draft.time.clone(),
            location: draft.location.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
}

impl From<&AppointmentPatch> for AppointmentUpdate {
    fn from(patch: &AppointmentPatch) -> Self {
        Self {
            doctor: patch.doctor.clone(),
            specialty: patch.specialty.clone(),
            date: patch.date,
            time: patch.time.clone(),
            location: patch.location.clone(),
            diagnosis: patch.diagnosis.clone(),
            weight: patch.weight.clone(),
            height: patch.height.clone(),
            notes: patch.notes.clone(),
            document_url: patch.document_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_member_row_maps_snake_case_columns() {
        let row: FamilyMemberRow = serde_json::from_value(json!({
            "id": "m1",
            "user_id": "u1",
            "name": "Carlos",
            "relation": "Father",
            "age": 71,
            "type": "elder",
            "blood_type": "A-",
            "doc_type": "DNI",
            "doc_number": "0001",
            "avatar_url": "https://cdn.example/c.png",
            "medications": [
                {"id": "med1", "member_id": "m1", "name": "Losartan", "dosage": "50mg", "frequency": "24h", "status": "active"}
            ],
            "vaccines": [
                {"id": "v1", "member_id": "m1", "name": "Influenza", "date": "2024-04-02"}
            ]
        }))
        .unwrap();

        let member = FamilyMember::from(row);
        assert_eq!(member.blood_type.as_deref(), Some("A-"));
        assert_eq!(member.doc_type.as_deref(), Some("DNI"));
        assert_eq!(member.doc_number.as_deref(), Some("0001"));
        assert_eq!(member.avatar.as_deref(), Some("https://cdn.example/c.png"));
        assert_eq!(member.member_type, MemberType::Elder);
        assert_eq!(member.medications.len(), 1);
        assert_eq!(member.vaccines[0].date, NaiveDate::from_ymd_opt(2024, 4, 2));
    }

    #[test]
    fn test_member_row_tolerates_bad_children() {
        let row: FamilyMemberRow = serde_json::from_value(json!({
            "id": "m3",
            "name": null,
            "medications": null,
            "vaccines": [
                {"id": "v1", "name": "BCG", "date": null},
                {"id": "v2", "name": "MMR", "date": "not a date"},
                {"id": "v3", "date": "2023-09-12"}
            ]
        }))
        .unwrap();
        let member = FamilyMember::from(row);
        assert_eq!(member.name, "");
        assert!(member.medications.is_empty());
        let ids: Vec<&str> = member.vaccines.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["v1", "v3"]);
        assert_eq!(member.vaccines[0].date, None);
        assert_eq!(member.vaccines[1].name, "");
    }

    #[test]
    fn test_decode_rows_skips_malformed() {
        let rows: Vec<AppointmentRow> = decode_rows(vec![
            json!({"id": "a1", "patient_id": "m1", "date": "2025-01-10"}),
            json!({"id": "a2", "patient_id": "m1", "date": null}),
        ]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "a1");
    }

    #[test]
    fn test_member_row_without_optional_columns() {
        let row: FamilyMemberRow = serde_json::from_value(json!({
            "id": "m2",
            "name": "Unborn",
            "age": 0,
            "is_prenatal": true,
            "doc_type": ""
        }))
        .unwrap();
        let member = FamilyMember::from(row);
        assert!(member.is_prenatal);
        assert_eq!(member.age, None);
        assert_eq!(member.doc_type, None);
        assert!(member.medications.is_empty());
    }

    #[test]
    fn test_appointment_row_patient_name_resolution() {
        let row: AppointmentRow = serde_json::from_value(json!({
            "id": "a1",
            "patient_id": "m1",
            "doctor": "Dr. Ruiz",
            "date": "2025-01-10",
            "time": "09:30",
            "family_members": {"name": "Carlos"}
        }))
        .unwrap();
        let appointment = row.clone().into_appointment(None);
        assert_eq!(appointment.patient_id, "m1");
        assert_eq!(appointment.patient_name, "Carlos");

        let mut orphan = row;
        orphan.family_members = None;
        assert_eq!(orphan.clone().into_appointment(Some("Ana")).patient_name, "Ana");
        assert_eq!(orphan.into_appointment(None).patient_name, UNKNOWN_PATIENT);
    }

    #[test]
    fn test_update_payloads_skip_unset_fields() {
        let update = MedicationUpdate::from(&MedicationPatch {
            dosage: Some("100mg".to_string()),
            ..Default::default()
        });
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value, json!({"dosage": "100mg"}));
    }

    #[test]
    fn test_member_insert_uses_remote_column_names() {
        let draft = NewFamilyMember {
            name: "Ana".to_string(),
            blood_type: Some("B+".to_string()),
            avatar: Some("a.png".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(FamilyMemberInsert::new("u1", &draft)).unwrap();
        assert_eq!(value["user_id"], "u1");
        assert_eq!(value["blood_type"], "B+");
        assert_eq!(value["avatar_url"], "a.png");
        assert_eq!(value["type"], "adult");
        assert!(value.get("bloodType").is_none());
    }
}
