//! Auth/domain state store.
//!
//! Holds the signed-in user, the family roster and the appointment list as a
//! [`FamilySnapshot`] published through a `watch` channel. The cache is
//! rebuilt from the backend on every logged-in auth event and cleared on
//! sign-out. Every mutation writes through to the backend first and patches
//! the cache only once the write succeeded.

use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::rows::{
    tables, AppointmentInsert, AppointmentRow, AppointmentUpdate, FamilyMemberInsert,
    FamilyMemberRow, FamilyMemberUpdate, MedicationInsert, MedicationRow, MedicationUpdate,
    ProfileInsert, ProfileRow, VaccineInsert, VaccineRow, VaccineUpdate, APPOINTMENT_WITH_PATIENT,
    MEMBER_WITH_CHILDREN,
};
use shared::{
    Appointment, AppointmentPatch, AuthEvent, FamilyMember, FamilyMemberPatch, Medication,
    MedicationPatch, NewAppointment, NewFamilyMember, NewMedication, NewVaccine, Role, User,
    Vaccine, VaccinePatch,
};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::password::{self, PasswordError};
use crate::recovery;
use crate::remote::{
    delete_by_id, insert_as, select_as, update_by_id, AuthSubscription, Query, RemoteClient,
};

/// Everything the views render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilySnapshot {
    pub user: Option<User>,
    pub family_members: Vec<FamilyMember>,
    pub appointments: Vec<Appointment>,
}

impl FamilySnapshot {
    pub fn member(&self, id: &str) -> Option<&FamilyMember> {
        self.family_members.iter().find(|m| m.id == id)
    }

    fn member_mut(&mut self, id: &str) -> Option<&mut FamilyMember> {
        self.family_members.iter_mut().find(|m| m.id == id)
    }

    fn sort_appointments(&mut self) {
        self.appointments.sort_by_key(Appointment::sort_key);
    }
}

/// Registration form input.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub confirmation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registered {
    SignedIn,
    /// The backend withholds the session until the email is confirmed.
    ConfirmationRequired,
}

struct StoreInner {
    remote: Arc<dyn RemoteClient>,
    state: watch::Sender<FamilySnapshot>,
}

impl StoreInner {
    /// Reloads the whole cache for `user_id`. Reads never fail the rebuild;
    /// anything that cannot be fetched is empty.
    async fn rebuild(&self, user_id: &str) {
        let user = match self.fetch_profile(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::warn!(user_id, "No profile row for signed-in user");
                self.clear();
                return;
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to load profile");
                self.clear();
                return;
            }
        };

        let family_members = self.fetch_members(user_id).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load family members");
            Vec::new()
        });
        let appointments = self
            .fetch_appointments(user_id, &family_members)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to load appointments");
                Vec::new()
            });

        tracing::info!(
            user_id,
            members = family_members.len(),
            appointments = appointments.len(),
            "State rebuilt"
        );
        let mut snapshot = FamilySnapshot {
            user: Some(user),
            family_members,
            appointments,
        };
        snapshot.sort_appointments();
        self.state.send_replace(snapshot);
    }

    fn clear(&self) {
        self.state.send_replace(FamilySnapshot::default());
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<User>> {
        let query = Query::from(tables::PROFILES).eq("id", user_id);
        let rows: Vec<ProfileRow> = select_as(self.remote.as_ref(), &query).await?;
        Ok(rows.into_iter().next().map(User::from))
    }

    async fn fetch_members(&self, user_id: &str) -> Result<Vec<FamilyMember>> {
        let query = Query::from(tables::FAMILY_MEMBERS)
            .select(MEMBER_WITH_CHILDREN)
            .eq("user_id", user_id);
        let rows: Vec<FamilyMemberRow> = select_as(self.remote.as_ref(), &query).await?;
        Ok(rows.into_iter().map(FamilyMember::from).collect())
    }

    async fn fetch_appointments(&self, user_id: &str, members: &[FamilyMember]) -> Result<Vec<Appointment>> {
        let query = Query::from(tables::APPOINTMENTS)
            .select(APPOINTMENT_WITH_PATIENT)
            .eq("user_id", user_id);
        let rows: Vec<AppointmentRow> = select_as(self.remote.as_ref(), &query).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let fallback = members
                    .iter()
                    .find(|m| m.id == row.patient_id)
                    .map(|m| m.name.clone());
                row.into_appointment(fallback.as_deref())
            })
            .collect())
    }

    async fn handle_event(&self, event: AuthEvent) {
        tracing::debug!(event = ?event.event, "Auth state changed");
        match event.session_user_id() {
            Some(user_id) => self.rebuild(user_id).await,
            None => self.clear(),
        }
    }
}

pub struct FamilyStore {
    inner: Arc<StoreInner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl FamilyStore {
    pub fn new(remote: Arc<dyn RemoteClient>) -> Self {
        let (state, _) = watch::channel(FamilySnapshot::default());
        Self {
            inner: Arc::new(StoreInner { remote, state }),
            listener: Mutex::new(None),
        }
    }

    /// Loads the current session's data and starts following auth events.
    pub async fn start(&self) {
        // Subscribe before loading so no event between the two is lost.
        let events = self.inner.remote.subscribe();

        match self.inner.remote.get_session().await {
            Ok(Some(session)) => self.inner.rebuild(&session.user.id).await,
            Ok(None) => self.inner.clear(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read session");
                self.inner.clear();
            }
        }

        let handle = tokio::spawn(listen(Arc::clone(&self.inner), events));
        if let Some(previous) = self.lock_listener().replace(handle) {
            previous.abort();
        }
    }

    /// Stops following auth events.
    pub fn shutdown(&self) {
        if let Some(handle) = self.lock_listener().take() {
            handle.abort();
            tracing::debug!("Auth listener stopped");
        }
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn snapshot(&self) -> FamilySnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<FamilySnapshot> {
        self.inner.state.subscribe()
    }

    pub fn remote(&self) -> &Arc<dyn RemoteClient> {
        &self.inner.remote
    }

    fn current_user_id(&self) -> Result<String> {
        self.inner
            .state
            .borrow()
            .user
            .as_ref()
            .map(|u| u.id.clone())
            .ok_or(AppError::NotSignedIn)
    }

    fn member(&self, member_id: &str) -> Result<FamilyMember> {
        self.inner
            .state
            .borrow()
            .member(member_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("family member {}", member_id)))
    }

    fn patch(&self, f: impl FnOnce(&mut FamilySnapshot)) {
        self.inner.state.send_modify(f);
    }

    // ------------------------------------------------------------------------
    // Auth
    // ------------------------------------------------------------------------

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(PasswordError::Empty.into());
        }
        let session = self
            .inner
            .remote
            .sign_in_with_password(email.trim(), password)
            .await?;
        self.inner.rebuild(&session.user.id).await;
        Ok(())
    }

    /// Creates the account and its profile row.
    ///
    /// A profile row that already exists (created by a backend trigger) is not
    /// an error; any other failure to write it is.
    pub async fn register(&self, form: &Registration) -> Result<Registered> {
        password::validate_email(&form.email)?;
        password::validate(&form.password, &form.confirmation)?;

        let email = form.email.trim();
        let metadata = json!({ "first_name": form.first_name, "last_name": form.last_name });
        let signed_up = self.inner.remote.sign_up(email, &form.password, metadata).await?;
        let user_id = signed_up.user.id.clone();
        tracing::info!(user_id = %user_id, "Account created");

        let profile = ProfileInsert {
            id: user_id.clone(),
            first_name: form.first_name.trim().to_string(),
            last_name: form.last_name.trim().to_string(),
            email: email.to_string(),
            role: Role::Admin,
        };
        match self
            .inner
            .remote
            .insert(tables::PROFILES, serde_json::to_value(&profile)?)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_unique_violation() => {
                tracing::debug!(user_id = %user_id, "Profile row already exists");
            }
            Err(e) => return Err(e),
        }

        if signed_up.session.is_none() {
            return Ok(Registered::ConfirmationRequired);
        }
        self.inner.rebuild(&user_id).await;
        Ok(Registered::SignedIn)
    }

    /// Emails a passwordless sign-in link for an existing account.
    pub async fn request_magic_link(&self, email: &str, redirect_to: &str) -> Result<()> {
        password::validate_email(email)?;
        self.inner.remote.send_magic_link(email.trim(), redirect_to).await?;
        tracing::info!("Sign-in link requested");
        Ok(())
    }

    /// Completes a passwordless sign-in from the emailed link.
    pub async fn sign_in_with_link(&self, href: &str) -> Result<()> {
        let tokens = recovery::sign_in_tokens(href)
            .ok_or_else(|| AppError::BadRequest("not a sign-in link".to_string()))?;
        let session = self
            .inner
            .remote
            .set_session(&tokens.access_token, tokens.refresh_token.as_deref())
            .await?;
        self.inner.rebuild(&session.user.id).await;
        Ok(())
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.inner.remote.sign_out().await?;
        self.inner.clear();
        Ok(())
    }

    pub async fn request_password_reset(&self, email: &str, redirect_to: &str) -> Result<()> {
        recovery::request_reset(self.inner.remote.as_ref(), email, redirect_to).await
    }

    // ------------------------------------------------------------------------
    // Family members
    // ------------------------------------------------------------------------

    pub async fn add_member(&self, draft: NewFamilyMember) -> Result<FamilyMember> {
        let user_id = self.current_user_id()?;
        let draft = draft.normalized();
        if draft.name.trim().is_empty() {
            return Err(AppError::BadRequest("member name is required".to_string()));
        }
        let row: FamilyMemberRow = insert_as(
            self.inner.remote.as_ref(),
            tables::FAMILY_MEMBERS,
            &FamilyMemberInsert::new(&user_id, &draft),
        )
        .await?;
        let member = FamilyMember::from(row);
        tracing::info!(member_id = %member.id, "Family member added");
        self.patch(|s| s.family_members.push(member.clone()));
        Ok(member)
    }

    pub async fn update_member(&self, member_id: &str, patch: FamilyMemberPatch) -> Result<()> {
        self.current_user_id()?;
        let member = self.member(member_id)?;
        let mut patch = patch;
        if member.is_prenatal {
            patch.age = None;
        }
        if patch.is_empty() {
            return Ok(());
        }
        update_by_id(
            self.inner.remote.as_ref(),
            tables::FAMILY_MEMBERS,
            member_id,
            &FamilyMemberUpdate::from(&patch),
        )
        .await?;
        self.patch(|s| {
            if let Some(member) = s.member_mut(member_id) {
                patch.apply(member);
            }
            if let Some(name) = &patch.name {
                s.appointments
                    .iter_mut()
                    .filter(|a| a.patient_id == member_id)
                    .for_each(|a| a.patient_name = name.clone());
            }
        });
        Ok(())
    }

    /// Stores a new avatar URL for the member.
    pub async fn update_member_photo(&self, member_id: &str, avatar_url: &str) -> Result<()> {
        self.current_user_id()?;
        self.member(member_id)?;
        let update = FamilyMemberUpdate {
            avatar_url: Some(avatar_url.to_string()),
            ..Default::default()
        };
        update_by_id(self.inner.remote.as_ref(), tables::FAMILY_MEMBERS, member_id, &update).await?;
        self.patch(|s| {
            if let Some(member) = s.member_mut(member_id) {
                member.avatar = Some(avatar_url.to_string());
            }
        });
        Ok(())
    }

    /// Deletes the member. Its medications, vaccines and appointments go with it.
    pub async fn delete_member(&self, member_id: &str) -> Result<()> {
        self.current_user_id()?;
        self.member(member_id)?;
        delete_by_id(self.inner.remote.as_ref(), tables::FAMILY_MEMBERS, member_id).await?;
        tracing::info!(member_id, "Family member deleted");
        self.patch(|s| {
            s.family_members.retain(|m| m.id != member_id);
            s.appointments.retain(|a| a.patient_id != member_id);
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Medications
    // ------------------------------------------------------------------------

    pub async fn add_medication(&self, member_id: &str, draft: NewMedication) -> Result<Medication> {
        self.current_user_id()?;
        self.member(member_id)?;
        let row: MedicationRow = insert_as(
            self.inner.remote.as_ref(),
            tables::MEDICATIONS,
            &MedicationInsert::new(member_id, &draft),
        )
        .await?;
        let medication = Medication::from(row);
        self.patch(|s| {
            if let Some(member) = s.member_mut(member_id) {
                member.medications.push(medication.clone());
            }
        });
        Ok(medication)
    }

    pub async fn update_medication(
        &self,
        member_id: &str,
        medication_id: &str,
        patch: MedicationPatch,
    ) -> Result<()> {
        self.current_user_id()?;
        let member = self.member(member_id)?;
        if !member.medications.iter().any(|m| m.id == medication_id) {
            return Err(AppError::NotFound(format!("medication {}", medication_id)));
        }
        if patch.is_empty() {
            return Ok(());
        }
        update_by_id(
            self.inner.remote.as_ref(),
            tables::MEDICATIONS,
            medication_id,
            &MedicationUpdate::from(&patch),
        )
        .await?;
        self.patch(|s| {
            if let Some(med) = s
                .member_mut(member_id)
                .and_then(|m| m.medications.iter_mut().find(|m| m.id == medication_id))
            {
                patch.apply(med);
            }
        });
        Ok(())
    }

    pub async fn delete_medication(&self, member_id: &str, medication_id: &str) -> Result<()> {
        self.current_user_id()?;
        let member = self.member(member_id)?;
        if !member.medications.iter().any(|m| m.id == medication_id) {
            return Err(AppError::NotFound(format!("medication {}", medication_id)));
        }
        delete_by_id(self.inner.remote.as_ref(), tables::MEDICATIONS, medication_id).await?;
        self.patch(|s| {
            if let Some(member) = s.member_mut(member_id) {
                member.medications.retain(|m| m.id != medication_id);
            }
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Vaccines
    // ------------------------------------------------------------------------

    pub async fn add_vaccine(&self, member_id: &str, draft: NewVaccine) -> Result<Vaccine> {
        self.current_user_id()?;
        self.member(member_id)?;
        let row: VaccineRow = insert_as(
            self.inner.remote.as_ref(),
            tables::VACCINES,
            &VaccineInsert::new(member_id, &draft),
        )
        .await?;
        let vaccine = Vaccine::from(row);
        self.patch(|s| {
            if let Some(member) = s.member_mut(member_id) {
                member.vaccines.push(vaccine.clone());
            }
        });
        Ok(vaccine)
    }

    pub async fn update_vaccine(&self, member_id: &str, vaccine_id: &str, patch: VaccinePatch) -> Result<()> {
        self.current_user_id()?;
        let member = self.member(member_id)?;
        if !member.vaccines.iter().any(|v| v.id == vaccine_id) {
            return Err(AppError::NotFound(format!("vaccine {}", vaccine_id)));
        }
        if patch.is_empty() {
            return Ok(());
        }
        update_by_id(
            self.inner.remote.as_ref(),
            tables::VACCINES,
            vaccine_id,
            &VaccineUpdate::from(&patch),
        )
        .await?;
        self.patch(|s| {
            if let Some(vaccine) = s
                .member_mut(member_id)
                .and_then(|m| m.vaccines.iter_mut().find(|v| v.id == vaccine_id))
            {
                patch.apply(vaccine);
            }
        });
        Ok(())
    }

    pub async fn delete_vaccine(&self, member_id: &str, vaccine_id: &str) -> Result<()> {
        self.current_user_id()?;
        let member = self.member(member_id)?;
        if !member.vaccines.iter().any(|v| v.id == vaccine_id) {
            return Err(AppError::NotFound(format!("vaccine {}", vaccine_id)));
        }
        delete_by_id(self.inner.remote.as_ref(), tables::VACCINES, vaccine_id).await?;
        self.patch(|s| {
            if let Some(member) = s.member_mut(member_id) {
                member.vaccines.retain(|v| v.id != vaccine_id);
            }
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Appointments
    // ------------------------------------------------------------------------

    pub async fn add_appointment(&self, draft: NewAppointment) -> Result<Appointment> {
        let user_id = self.current_user_id()?;
        let patient = self.member(&draft.patient_id)?;
        let row: AppointmentRow = insert_as(
            self.inner.remote.as_ref(),
            tables::APPOINTMENTS,
            &AppointmentInsert::new(&user_id, &draft),
        )
        .await?;
        let appointment = row.into_appointment(Some(&patient.name));
        tracing::info!(appointment_id = %appointment.id, "Appointment added");
        self.patch(|s| {
            s.appointments.push(appointment.clone());
            s.sort_appointments();
        });
        Ok(appointment)
    }

    /// Records the clinical outcome of an appointment or moves it.
    pub async fn update_appointment(&self, appointment_id: &str, patch: AppointmentPatch) -> Result<()> {
        self.current_user_id()?;
        self.appointment(appointment_id)?;
        if patch.is_empty() {
            return Ok(());
        }
        update_by_id(
            self.inner.remote.as_ref(),
            tables::APPOINTMENTS,
            appointment_id,
            &AppointmentUpdate::from(&patch),
        )
        .await?;
        self.patch(|s| {
            if let Some(appointment) = s.appointments.iter_mut().find(|a| a.id == appointment_id) {
                patch.apply(appointment);
            }
            s.sort_appointments();
        });
        Ok(())
    }

    pub async fn delete_appointment(&self, appointment_id: &str) -> Result<()> {
        self.current_user_id()?;
        self.appointment(appointment_id)?;
        delete_by_id(self.inner.remote.as_ref(), tables::APPOINTMENTS, appointment_id).await?;
        self.patch(|s| s.appointments.retain(|a| a.id != appointment_id));
        Ok(())
    }

    fn appointment(&self, appointment_id: &str) -> Result<Appointment> {
        self.inner
            .state
            .borrow()
            .appointments
            .iter()
            .find(|a| a.id == appointment_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("appointment {}", appointment_id)))
    }
}

impl Drop for FamilyStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn listen(inner: Arc<StoreInner>, mut events: AuthSubscription) {
    while let Some(event) = events.next().await {
        inner.handle_event(event).await;
    }
    tracing::debug!("Auth event stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{FailOn, MemoryBackend};
    use chrono::NaiveDate;
    use shared::MedicationStatus;

    const PASSWORD: &str = "Str0ng!Pass";

    async fn signed_in() -> (Arc<MemoryBackend>, FamilyStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = FamilyStore::new(backend.clone());
        store
            .register(&Registration {
                first_name: "Ana".to_string(),
                last_name: "Lopez".to_string(),
                email: "ana@example.com".to_string(),
                password: PASSWORD.to_string(),
                confirmation: PASSWORD.to_string(),
            })
            .await
            .unwrap();
        (backend, store)
    }

    fn draft(name: &str) -> NewFamilyMember {
        NewFamilyMember {
            name: name.to_string(),
            relation: "Son".to_string(),
            age: Some(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_register_loads_profile() {
        let (_, store) = signed_in().await;
        let user = store.snapshot().user.unwrap();
        assert_eq!(user.full_name(), "Ana Lopez");
        assert_eq!(user.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_writes_require_sign_in() {
        let store = FamilyStore::new(Arc::new(MemoryBackend::new()));
        assert!(matches!(store.add_member(draft("Leo")).await, Err(AppError::NotSignedIn)));
    }

    #[tokio::test]
    async fn test_sign_in_rejects_empty_password_locally() {
        let backend = Arc::new(MemoryBackend::new());
        let store = FamilyStore::new(backend.clone());
        assert!(matches!(
            store.sign_in("ana@example.com", "").await,
            Err(AppError::Password(PasswordError::Empty))
        ));
        assert_eq!(backend.call_count("sign_in_with_password"), 0);
    }

    #[tokio::test]
    async fn test_add_member_then_failed_insert_leaves_cache() {
        let (backend, store) = signed_in().await;
        store.add_member(draft("Leo")).await.unwrap();
        let before = store.snapshot();

        backend.fail_next(tables::FAMILY_MEMBERS, FailOn::Insert);
        assert!(store.add_member(draft("Mia")).await.is_err());
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn test_update_member_renames_appointments() {
        let (_, store) = signed_in().await;
        let member = store.add_member(draft("Leo")).await.unwrap();
        store
            .add_appointment(NewAppointment {
                doctor: "Dr. Ruiz".to_string(),
                specialty: "Pediatrics".to_string(),
                date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                time: "10:00".to_string(),
                location: "Clinic".to_string(),
                patient_id: member.id.clone(),
            })
            .await
            .unwrap();

        store
            .update_member(
                &member.id,
                FamilyMemberPatch {
                    name: Some("Leonardo".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.member(&member.id).unwrap().name, "Leonardo");
        assert_eq!(snapshot.appointments[0].patient_name, "Leonardo");
    }

    #[tokio::test]
    async fn test_medication_lifecycle() {
        let (backend, store) = signed_in().await;
        let member = store.add_member(draft("Leo")).await.unwrap();
        let med = store
            .add_medication(
                &member.id,
                NewMedication {
                    name: "Ibuprofen".to_string(),
                    dosage: "200mg".to_string(),
                    frequency: "8h".to_string(),
                    status: MedicationStatus::Active,
                },
            )
            .await
            .unwrap();

        store
            .update_medication(
                &member.id,
                &med.id,
                MedicationPatch {
                    status: Some(MedicationStatus::Inactive),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.member(&member.id).unwrap().medications[0].status, MedicationStatus::Inactive);
        assert_eq!(backend.rows(tables::MEDICATIONS)[0]["status"], "inactive");

        store.delete_medication(&member.id, &med.id).await.unwrap();
        assert!(store.snapshot().member(&member.id).unwrap().medications.is_empty());
        assert!(backend.rows(tables::MEDICATIONS).is_empty());
    }

    #[tokio::test]
    async fn test_vaccine_lifecycle() {
        let (backend, store) = signed_in().await;
        let member = store.add_member(draft("Leo")).await.unwrap();
        let vaccine = store
            .add_vaccine(
                &member.id,
                NewVaccine {
                    name: "Hepatitis B".to_string(),
                    date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                },
            )
            .await
            .unwrap();

        let corrected = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        store
            .update_vaccine(
                &member.id,
                &vaccine.id,
                VaccinePatch {
                    date: Some(corrected),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(store.snapshot().member(&member.id).unwrap().vaccines[0].date, Some(corrected));
        assert_eq!(backend.rows(tables::VACCINES)[0]["date"], "2024-06-03");

        store.delete_vaccine(&member.id, &vaccine.id).await.unwrap();
        assert!(store.snapshot().member(&member.id).unwrap().vaccines.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_medication_is_not_found() {
        let (backend, store) = signed_in().await;
        let member = store.add_member(draft("Leo")).await.unwrap();
        let result = store
            .update_medication(&member.id, "missing", MedicationPatch {
                dosage: Some("1mg".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(backend.call_count("update"), 0);
    }

    #[tokio::test]
    async fn test_sign_out_clears_state() {
        let (_, store) = signed_in().await;
        store.add_member(draft("Leo")).await.unwrap();
        store.sign_out().await.unwrap();
        assert_eq!(store.snapshot(), FamilySnapshot::default());
    }

    #[tokio::test]
    async fn test_magic_link_sign_in() {
        let (backend, store) = signed_in().await;
        store.add_member(draft("Leo")).await.unwrap();
        store.sign_out().await.unwrap();

        store
            .request_magic_link("ana@example.com", "https://app.example")
            .await
            .unwrap();
        let link = backend.sent_recovery_links().pop().unwrap();
        assert!(link.ends_with("type=magiclink"));

        store.sign_in_with_link(&link).await.unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.user.unwrap().email, "ana@example.com");
        assert_eq!(snapshot.family_members[0].name, "Leo");

        // One use only.
        store.sign_out().await.unwrap();
        assert!(store.sign_in_with_link(&link).await.is_err());
        assert!(matches!(
            store.sign_in_with_link("https://app.example/#/login").await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            store.request_magic_link("not-an-email", "https://app.example").await,
            Err(AppError::Password(_))
        ));
    }

    #[tokio::test]
    async fn test_read_failure_degrades_to_empty() {
        let (backend, store) = signed_in().await;
        store.add_member(draft("Leo")).await.unwrap();
        store.sign_out().await.unwrap();

        backend.fail_next(tables::FAMILY_MEMBERS, FailOn::Select);
        store.sign_in("ana@example.com", PASSWORD).await.unwrap();
        let snapshot = store.snapshot();
        assert!(snapshot.user.is_some());
        assert!(snapshot.family_members.is_empty());
    }

    #[tokio::test]
    async fn test_listener_follows_auth_events() {
        let backend = Arc::new(MemoryBackend::new());
        let store = FamilyStore::new(backend.clone());
        store.start().await;
        let mut snapshots = store.subscribe_snapshots();

        let signed_up = backend
            .sign_up("ana@example.com", PASSWORD, serde_json::Value::Null)
            .await
            .unwrap();
        backend.seed(
            tables::PROFILES,
            json!({ "id": signed_up.user.id, "first_name": "Ana", "last_name": "Lopez", "email": "ana@example.com", "role": "admin" }),
        );
        backend.sign_out().await.unwrap();
        backend.sign_in_with_password("ana@example.com", PASSWORD).await.unwrap();

        loop {
            snapshots.changed().await.unwrap();
            if snapshots.borrow_and_update().user.is_some() {
                break;
            }
        }

        store.shutdown();
    }
}
