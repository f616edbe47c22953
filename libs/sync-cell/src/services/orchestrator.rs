use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use clinic_cell::ClinicClient;
use shared_config::AppConfig;
use shared_models::error::SyncError;
use shared_models::sync::{CanonicalAppointment, CanonicalContact};
use shared_utils::utc_to_epoch_ms;

use crate::models::{DispatchJob, MatchAction, SyncKind, SyncReport, SyncScope};
use crate::services::dispatcher::Dispatcher;
use crate::services::repository::SyncStateRepository;
use crate::services::{mapper, matching};

/// Batch pull from the Clinic System, reconcile, persist, then push what the
/// CRM is still missing. One cycle at a time.
pub struct SyncOrchestrator {
    config: Arc<AppConfig>,
    clinic: Arc<ClinicClient>,
    repository: Arc<dyn SyncStateRepository>,
    dispatcher: Arc<Dispatcher>,
    cycle: Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(
        config: Arc<AppConfig>,
        clinic: Arc<ClinicClient>,
        repository: Arc<dyn SyncStateRepository>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            clinic,
            repository,
            dispatcher,
            cycle: Mutex::new(()),
        }
    }

    /// Runs `scope` unless another cycle holds the lock, in which case `None`.
    pub async fn try_run(&self, scope: SyncScope) -> Option<Vec<SyncReport>> {
        let Ok(_guard) = self.cycle.try_lock() else {
            warn!("Sync cycle already running, skipping {:?} run", scope);
            return None;
        };

        let reports = match scope {
            SyncScope::Patients => vec![self.sync_patients().await],
            SyncScope::Appointments => vec![self.sync_appointments().await],
            SyncScope::Full => self.run_cycle().await,
        };
        Some(reports)
    }

    /// Patients first so the appointment pass sees fresh contact links.
    pub async fn run_cycle(&self) -> Vec<SyncReport> {
        let patients = self.sync_patients().await;
        let appointments = self.sync_appointments().await;
        vec![patients, appointments]
    }

    #[instrument(skip(self))]
    pub async fn sync_patients(&self) -> SyncReport {
        let mut report = SyncReport::new(SyncKind::Patients);
        match self.reconcile_patients(&mut report).await {
            Ok(()) => {
                info!(
                    "Patient sync: {} fetched, {} invalid, {} created, {} updated, {} unchanged, {} pushed",
                    report.fetched,
                    report.invalid,
                    report.created,
                    report.updated,
                    report.skipped,
                    report.dispatched.total()
                );
                report
            }
            Err(e) => {
                error!("Patient sync aborted: {}", e);
                report.failed(&e)
            }
        }
    }

    async fn reconcile_patients(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let patients = self.clinic.list_active_patients().await?;
        report.fetched = patients.total();
        report.invalid = patients.invalid;

        let mut seen = HashSet::new();
        let candidates: Vec<CanonicalContact> = patients
            .items
            .iter()
            .filter(|patient| seen.insert(patient.id.clone()))
            .map(mapper::contact_from_clinic)
            .collect();
        let clinic_ids: Vec<String> = seen.into_iter().collect();

        let mut pool = self.repository.contacts_by_clinic_ids(&clinic_ids).await?;
        pool.extend(self.repository.contacts_without_clinic_id().await?);

        let mut to_create = Vec::new();
        let mut to_update = Vec::new();

        for candidate in candidates {
            let decision = matching::resolve(&candidate, &pool);
            match (decision.action, decision.existing) {
                (MatchAction::Skip, _) => report.skipped += 1,
                (MatchAction::Update, Some(existing)) => {
                    let merged = matching::merge_candidate(&existing, &candidate);
                    if let Some(slot) = pool.iter_mut().find(|row| row.id == merged.id) {
                        *slot = merged.clone();
                    }
                    to_update.push(merged);
                }
                _ => {
                    pool.push(candidate.clone());
                    to_create.push(candidate);
                }
            }
        }

        let batch_size = self.config.sync_batch_size.max(1);
        for batch in to_update.chunks(batch_size) {
            self.repository.update_contacts(batch).await?;
        }
        report.updated = to_update.len();

        for batch in to_create.chunks(batch_size) {
            report.created += self.repository.insert_contacts(batch).await?;
        }

        let jobs: Vec<DispatchJob> = self
            .repository
            .contacts_by_clinic_ids(&clinic_ids)
            .await?
            .into_iter()
            .filter(|row| row.crm_contact_id.is_none())
            .map(|row| DispatchJob::PushContact(row.id))
            .collect();
        report.dispatched = self.dispatcher.run(jobs).await;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn sync_appointments(&self) -> SyncReport {
        let mut report = SyncReport::new(SyncKind::Appointments);
        match self.reconcile_appointments(&mut report).await {
            Ok(()) => {
                info!(
                    "Appointment sync: {} fetched, {} invalid, {} created, {} updated, {} pushed",
                    report.fetched,
                    report.invalid,
                    report.created,
                    report.updated,
                    report.dispatched.total()
                );
                report
            }
            Err(e) => {
                error!("Appointment sync aborted: {}", e);
                report.failed(&e)
            }
        }
    }

    async fn reconcile_appointments(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let now = Utc::now();
        let from = now - Duration::days(self.config.appointment_lookback_days);
        let to = now + Duration::days(self.config.appointment_lookahead_days);

        let events = self
            .clinic
            .list_events(utc_to_epoch_ms(from), utc_to_epoch_ms(to))
            .await?;
        report.fetched = events.total();
        report.invalid = events.invalid;

        let mut seen = HashSet::new();
        let mut appointments = Vec::new();
        for event in &events.items {
            match mapper::appointment_from_clinic(event) {
                Some(appointment) => {
                    let clinic_id = appointment.clinic_appointment_id.clone().unwrap_or_default();
                    if seen.insert(clinic_id) {
                        appointments.push(appointment);
                    }
                }
                None => report.invalid += 1,
            }
        }
        if report.invalid > 0 {
            warn!("Skipped {} unreadable events or events without id, patient or times", report.invalid);
        }
        let clinic_ids: Vec<String> = seen.into_iter().collect();

        let patient_ids: Vec<String> = appointments
            .iter()
            .map(|a| a.clinic_patient_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let contact_links: HashMap<String, Option<String>> = self
            .repository
            .contacts_by_clinic_ids(&patient_ids)
            .await?
            .into_iter()
            .filter_map(|c| Some((c.clinic_patient_id?, c.crm_contact_id)))
            .collect();

        let stored: HashMap<String, CanonicalAppointment> = self
            .repository
            .appointments_by_clinic_ids(&clinic_ids)
            .await?
            .into_iter()
            .filter_map(|a| Some((a.clinic_appointment_id.clone()?, a)))
            .collect();

        let mut to_create = Vec::new();
        let mut to_update = Vec::new();

        for mut appointment in appointments {
            appointment.crm_contact_id = contact_links
                .get(&appointment.clinic_patient_id)
                .cloned()
                .flatten();

            let key = appointment.clinic_appointment_id.clone().unwrap_or_default();
            match stored.get(&key) {
                Some(existing) => {
                    let refreshed = refresh_appointment(existing, appointment);
                    if same_appointment(existing, &refreshed) {
                        report.skipped += 1;
                    } else {
                        to_update.push(refreshed);
                    }
                }
                None => to_create.push(appointment),
            }
        }

        let batch_size = self.config.sync_batch_size.max(1);
        for batch in to_update.chunks(batch_size) {
            self.repository.update_appointments(batch).await?;
        }
        report.updated = to_update.len();

        for batch in to_create.chunks(batch_size) {
            report.created += self.repository.insert_appointments(batch).await?;
        }

        let jobs: Vec<DispatchJob> = self
            .repository
            .appointments_by_clinic_ids(&clinic_ids)
            .await?
            .into_iter()
            .filter(CanonicalAppointment::awaits_crm_push)
            .map(|a| DispatchJob::PushAppointment(a.id))
            .collect();
        report.dispatched = self.dispatcher.run(jobs).await;

        Ok(())
    }
}

/// Fresh Clinic values on top of the stored row's identity. A contact link
/// already stored survives when the current contact map has none.
fn refresh_appointment(existing: &CanonicalAppointment, fresh: CanonicalAppointment) -> CanonicalAppointment {
    CanonicalAppointment {
        id: existing.id,
        crm_appointment_id: existing.crm_appointment_id.clone(),
        crm_contact_id: fresh.crm_contact_id.or_else(|| existing.crm_contact_id.clone()),
        source: existing.source,
        created_at: existing.created_at,
        ..fresh
    }
}

fn same_appointment(a: &CanonicalAppointment, b: &CanonicalAppointment) -> bool {
    a.clinic_patient_id == b.clinic_patient_id
        && a.crm_contact_id == b.crm_contact_id
        && a.start_time == b.start_time
        && a.end_time == b.end_time
        && a.status == b.status
        && a.event_type_id == b.event_type_id
        && a.user_id == b.user_id
        && a.client_id == b.client_id
        && a.admin_info_id == b.admin_info_id
}
