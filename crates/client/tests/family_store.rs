use chrono::NaiveDate;
use famcare::error::AppError;
use famcare::remote::{FailOn, MemoryBackend, RemoteClient};
use famcare::store::{FamilySnapshot, FamilyStore, Registered, Registration};
use famcare::views::DashboardSummary;
use serde_json::json;
use shared::rows::tables;
use shared::{
    AppointmentPatch, MedicationPatch, MedicationStatus, NewAppointment, NewFamilyMember,
    NewMedication, NewVaccine, UNKNOWN_PATIENT,
};
use std::sync::Arc;

const PASSWORD: &str = "Str0ng!Pass";

fn registration() -> Registration {
    Registration {
        first_name: "Ana".to_string(),
        last_name: "Lopez".to_string(),
        email: "ana@example.com".to_string(),
        password: PASSWORD.to_string(),
        confirmation: PASSWORD.to_string(),
    }
}

async fn signed_in_store(backend: &Arc<MemoryBackend>) -> FamilyStore {
    let store = FamilyStore::new(backend.clone());
    assert_eq!(store.register(&registration()).await.unwrap(), Registered::SignedIn);
    store
}

fn member(name: &str) -> NewFamilyMember {
    NewFamilyMember {
        name: name.to_string(),
        relation: "Son".to_string(),
        age: Some(6),
        ..Default::default()
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn test_registration_tolerates_existing_profile() {
    let backend = Arc::new(MemoryBackend::new().with_profile_trigger());
    let store = signed_in_store(&backend).await;

    assert_eq!(backend.rows(tables::PROFILES).len(), 1);
    let user = store.snapshot().user.unwrap();
    assert_eq!(user.email, "ana@example.com");
}

#[tokio::test]
async fn test_registration_fails_on_other_profile_errors() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_next(tables::PROFILES, FailOn::Insert);
    let store = FamilyStore::new(backend.clone());

    let err = store.register(&registration()).await.unwrap_err();
    assert!(matches!(err, AppError::Backend { .. }));
    assert!(!err.is_unique_violation());
    assert!(store.snapshot().user.is_none());
}

#[tokio::test]
async fn test_registration_validates_locally() {
    let backend = Arc::new(MemoryBackend::new());
    let store = FamilyStore::new(backend.clone());
    let mut form = registration();
    form.password = "weak".to_string();
    form.confirmation = "weak".to_string();

    assert!(matches!(store.register(&form).await, Err(AppError::Password(_))));
    assert_eq!(backend.call_count("sign_up"), 0);
}

#[tokio::test]
async fn test_prenatal_member_is_normalized() {
    let backend = Arc::new(MemoryBackend::new());
    let store = signed_in_store(&backend).await;

    let added = store
        .add_member(NewFamilyMember {
            name: "Baby".to_string(),
            relation: "Daughter".to_string(),
            age: Some(2),
            doc_type: Some("DNI".to_string()),
            doc_number: Some("40111222".to_string()),
            is_prenatal: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(added.age, None);
    assert_eq!(added.doc_type, None);
    assert_eq!(added.doc_number, None);

    let row = &backend.rows(tables::FAMILY_MEMBERS)[0];
    assert_eq!(row["age"], json!(null));
    assert_eq!(row["doc_type"], json!(null));
    assert_eq!(row["doc_number"], json!(null));
    assert_eq!(row["is_prenatal"], json!(true));
}

#[tokio::test]
async fn test_failed_medication_update_leaves_cache_unchanged() {
    let backend = Arc::new(MemoryBackend::new());
    let store = signed_in_store(&backend).await;
    let leo = store.add_member(member("Leo")).await.unwrap();
    let med = store
        .add_medication(
            &leo.id,
            NewMedication {
                name: "Salbutamol".to_string(),
                dosage: "100mcg".to_string(),
                frequency: "as needed".to_string(),
                status: MedicationStatus::Active,
            },
        )
        .await
        .unwrap();
    let before = store.snapshot();

    backend.fail_next(tables::MEDICATIONS, FailOn::Update);
    let result = store
        .update_medication(
            &leo.id,
            &med.id,
            MedicationPatch {
                dosage: Some("200mcg".to_string()),
                status: Some(MedicationStatus::Inactive),
                ..Default::default()
            },
        )
        .await;

    assert!(result.is_err());
    assert_eq!(store.snapshot(), before);
    assert_eq!(
        store.snapshot().member(&leo.id).unwrap().medications,
        before.member(&leo.id).unwrap().medications
    );
}

#[tokio::test]
async fn test_delete_member_cascades() {
    let backend = Arc::new(MemoryBackend::new());
    let store = signed_in_store(&backend).await;
    let leo = store.add_member(member("Leo")).await.unwrap();
    let mia = store.add_member(member("Mia")).await.unwrap();

    store
        .add_vaccine(&leo.id, NewVaccine { name: "MMR".to_string(), date: date(2021, 4, 2) })
        .await
        .unwrap();
    for patient in [&leo.id, &mia.id] {
        store
            .add_appointment(NewAppointment {
                doctor: "Dr. Ruiz".to_string(),
                specialty: "Pediatrics".to_string(),
                date: date(2026, 5, 1),
                time: "09:30".to_string(),
                location: "Clinic".to_string(),
                patient_id: patient.clone(),
            })
            .await
            .unwrap();
    }

    store.delete_member(&leo.id).await.unwrap();

    let snapshot = store.snapshot();
    assert_eq!(snapshot.family_members.len(), 1);
    assert_eq!(snapshot.appointments.len(), 1);
    assert_eq!(snapshot.appointments[0].patient_id, mia.id);
    assert!(backend.rows(tables::VACCINES).is_empty());
    assert_eq!(backend.rows(tables::APPOINTMENTS).len(), 1);
}

#[tokio::test]
async fn test_failed_delete_keeps_member() {
    let backend = Arc::new(MemoryBackend::new());
    let store = signed_in_store(&backend).await;
    let leo = store.add_member(member("Leo")).await.unwrap();

    backend.fail_next(tables::FAMILY_MEMBERS, FailOn::Delete);
    assert!(store.delete_member(&leo.id).await.is_err());
    assert!(store.snapshot().member(&leo.id).is_some());
}

#[tokio::test]
async fn test_rebuild_reads_nested_records_and_patient_names() {
    let backend = Arc::new(MemoryBackend::new());
    let store = signed_in_store(&backend).await;
    let user_id = store.snapshot().user.unwrap().id;
    let leo = store.add_member(member("Leo")).await.unwrap();
    store
        .add_medication(
            &leo.id,
            NewMedication {
                name: "Ibuprofen".to_string(),
                dosage: "200mg".to_string(),
                frequency: "8h".to_string(),
                status: MedicationStatus::Active,
            },
        )
        .await
        .unwrap();
    // An appointment whose patient no longer resolves.
    backend.seed(
        tables::APPOINTMENTS,
        json!({
            "id": "orphan",
            "user_id": user_id,
            "patient_id": "gone",
            "doctor": "Dr. Paz",
            "date": "2026-01-15",
            "time": "10:00"
        }),
    );

    store.sign_out().await.unwrap();
    assert_eq!(store.snapshot(), FamilySnapshot::default());
    store.sign_in("ana@example.com", PASSWORD).await.unwrap();

    let snapshot = store.snapshot();
    let reloaded = snapshot.member(&leo.id).unwrap();
    assert_eq!(reloaded.medications.len(), 1);
    assert_eq!(reloaded.medications[0].name, "Ibuprofen");
    let orphan = snapshot.appointments.iter().find(|a| a.id == "orphan").unwrap();
    assert_eq!(orphan.patient_name, UNKNOWN_PATIENT);
}

#[tokio::test]
async fn test_missing_profile_leaves_state_empty() {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .sign_up("bo@example.com", PASSWORD, serde_json::Value::Null)
        .await
        .unwrap();
    backend.sign_out().await.unwrap();

    let store = FamilyStore::new(backend.clone());
    store.sign_in("bo@example.com", PASSWORD).await.unwrap();
    assert_eq!(store.snapshot(), FamilySnapshot::default());
}

#[tokio::test]
async fn test_appointment_clinical_record() {
    let backend = Arc::new(MemoryBackend::new());
    let store = signed_in_store(&backend).await;
    let leo = store.add_member(member("Leo")).await.unwrap();
    let appointment = store
        .add_appointment(NewAppointment {
            doctor: "Dr. Ruiz".to_string(),
            specialty: "Pediatrics".to_string(),
            date: date(2026, 1, 10),
            time: "09:00".to_string(),
            location: "Clinic".to_string(),
            patient_id: leo.id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(appointment.patient_name, "Leo");

    store
        .update_appointment(
            &appointment.id,
            AppointmentPatch {
                diagnosis: Some("Otitis".to_string()),
                weight: Some("21kg".to_string()),
                document_url: Some("https://files.example/report.pdf".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let snapshot = store.snapshot();
    assert_eq!(snapshot.appointments[0].diagnosis.as_deref(), Some("Otitis"));
    assert_eq!(backend.rows(tables::APPOINTMENTS)[0]["diagnosis"], "Otitis");

    let summary = DashboardSummary::compute(&snapshot, date(2026, 2, 1));
    assert_eq!(summary.past.len(), 1);
    assert!(summary.next_appointment().is_none());
}

#[tokio::test]
async fn test_appointment_for_unknown_member_is_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    let store = signed_in_store(&backend).await;
    let result = store
        .add_appointment(NewAppointment {
            doctor: "Dr. Ruiz".to_string(),
            specialty: String::new(),
            date: date(2026, 1, 10),
            time: "09:00".to_string(),
            location: String::new(),
            patient_id: "nobody".to_string(),
        })
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert_eq!(backend.call_count("insert"), 1); // the profile row only
}

#[tokio::test]
async fn test_offline_backend_keeps_data_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.json");

    {
        let backend = Arc::new(MemoryBackend::open(&path).unwrap());
        let store = signed_in_store(&backend).await;
        store.add_member(member("Leo")).await.unwrap();
    }

    let backend = Arc::new(MemoryBackend::open(&path).unwrap());
    let store = FamilyStore::new(backend.clone());
    store.start().await;
    let snapshot = store.snapshot();
    assert_eq!(snapshot.user.unwrap().first_name, "Ana");
    assert_eq!(snapshot.family_members[0].name, "Leo");
    store.shutdown();

    assert!(backend.get_session().await.unwrap().is_some());
}

#[tokio::test]
async fn test_malformed_rows_do_not_hide_the_family() {
    let backend = Arc::new(MemoryBackend::new());
    let store = signed_in_store(&backend).await;
    let user_id = store.snapshot().user.unwrap().id;
    let leo = store.add_member(member("Leo")).await.unwrap();
    let mia = store.add_member(member("Mia")).await.unwrap();

    backend.seed(
        tables::VACCINES,
        json!({"id": "v1", "member_id": leo.id, "name": "BCG", "date": null}),
    );
    backend.seed(
        tables::VACCINES,
        json!({"id": "v2", "member_id": leo.id, "name": "MMR", "date": 20210402}),
    );
    backend.seed(
        tables::APPOINTMENTS,
        json!({"id": "a1", "user_id": user_id, "patient_id": mia.id, "date": "2026-03-02"}),
    );
    backend.seed(
        tables::APPOINTMENTS,
        json!({"id": "a2", "user_id": user_id, "patient_id": mia.id, "date": null}),
    );

    store.sign_out().await.unwrap();
    store.sign_in("ana@example.com", PASSWORD).await.unwrap();

    let snapshot = store.snapshot();
    assert_eq!(snapshot.family_members.len(), 2);
    let vaccines = &snapshot.member(&leo.id).unwrap().vaccines;
    assert_eq!(vaccines.len(), 1);
    assert_eq!(vaccines[0].name, "BCG");
    assert_eq!(vaccines[0].date, None);
    assert_eq!(snapshot.appointments.len(), 1);
    assert_eq!(snapshot.appointments[0].id, "a1");
}
