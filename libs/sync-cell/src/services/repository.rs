use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared_models::error::SyncError;
use shared_models::sync::{CanonicalAppointment, CanonicalContact};
use shared_utils::phone_match_key;

/// Persisted mapping between Clinic and CRM ids.
///
/// Batch writes are all-or-nothing. Inserts silently drop rows that would
/// collide with an existing id on either side; updates and id write-backs
/// fail with `DuplicateConflict` instead.
#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    async fn contact(&self, id: Uuid) -> Result<Option<CanonicalContact>, SyncError>;
    async fn contact_by_crm_id(&self, crm_id: &str) -> Result<Option<CanonicalContact>, SyncError>;
    async fn contacts_by_clinic_ids(&self, clinic_ids: &[String]) -> Result<Vec<CanonicalContact>, SyncError>;
    /// Rows not yet linked to a Clinic patient.
    async fn contacts_without_clinic_id(&self) -> Result<Vec<CanonicalContact>, SyncError>;
    /// Rows whose phone matches `phone` or whose email equals `email`.
    async fn contact_candidates(
        &self,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> Result<Vec<CanonicalContact>, SyncError>;
    /// Returns how many rows were actually written.
    async fn insert_contacts(&self, rows: &[CanonicalContact]) -> Result<usize, SyncError>;
    async fn update_contacts(&self, rows: &[CanonicalContact]) -> Result<(), SyncError>;
    async fn set_contact_crm_id(&self, id: Uuid, crm_id: &str) -> Result<(), SyncError>;
    async fn set_contact_clinic_id(&self, id: Uuid, clinic_id: &str) -> Result<(), SyncError>;

    async fn appointment(&self, id: Uuid) -> Result<Option<CanonicalAppointment>, SyncError>;
    async fn appointment_by_crm_id(&self, crm_id: &str) -> Result<Option<CanonicalAppointment>, SyncError>;
    async fn appointments_by_clinic_ids(
        &self,
        clinic_ids: &[String],
    ) -> Result<Vec<CanonicalAppointment>, SyncError>;
    async fn insert_appointments(&self, rows: &[CanonicalAppointment]) -> Result<usize, SyncError>;
    async fn update_appointments(&self, rows: &[CanonicalAppointment]) -> Result<(), SyncError>;
    async fn set_appointment_crm_id(&self, id: Uuid, crm_id: &str) -> Result<(), SyncError>;
    async fn set_appointment_clinic_id(&self, id: Uuid, clinic_id: &str) -> Result<(), SyncError>;
}

/// Identity columns of a row, for the uniqueness checks.
trait Keyed {
    fn key(&self) -> Uuid;
    fn clinic_id(&self) -> Option<&str>;
    fn crm_id(&self) -> Option<&str>;
}

impl Keyed for CanonicalContact {
    fn key(&self) -> Uuid {
        self.id
    }
    fn clinic_id(&self) -> Option<&str> {
        self.clinic_patient_id.as_deref()
    }
    fn crm_id(&self) -> Option<&str> {
        self.crm_contact_id.as_deref()
    }
}

impl Keyed for CanonicalAppointment {
    fn key(&self) -> Uuid {
        self.id
    }
    fn clinic_id(&self) -> Option<&str> {
        self.clinic_appointment_id.as_deref()
    }
    fn crm_id(&self) -> Option<&str> {
        self.crm_appointment_id.as_deref()
    }
}

/// A table with unique clinic and CRM id columns.
struct Table<T> {
    rows: HashMap<Uuid, T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self { rows: HashMap::new() }
    }
}

impl<T: Keyed + Clone> Table<T> {
    fn holder_of(&self, clinic_id: Option<&str>, crm_id: Option<&str>, except: Uuid) -> Option<&T> {
        self.rows.values().find(|row| {
            row.key() != except
                && ((clinic_id.is_some() && row.clinic_id() == clinic_id)
                    || (crm_id.is_some() && row.crm_id() == crm_id))
        })
    }

    fn insert_ignoring_duplicates(&mut self, rows: &[T]) -> usize {
        let mut inserted = 0;
        for row in rows {
            let collides = self.rows.contains_key(&row.key())
                || self.holder_of(row.clinic_id(), row.crm_id(), row.key()).is_some();
            if !collides {
                self.rows.insert(row.key(), row.clone());
                inserted += 1;
            }
        }
        inserted
    }

    fn update_all(&mut self, rows: &[T]) -> Result<(), SyncError> {
        let mut staged = HashMap::with_capacity(rows.len());
        for row in rows {
            if !self.rows.contains_key(&row.key()) {
                return Err(SyncError::Repository(format!("row {} does not exist", row.key())));
            }
            staged.insert(row.key(), row.clone());
        }

        let mut next = Table { rows: self.rows.clone() };
        next.rows.extend(staged);
        next.check_unique()?;

        *self = next;
        Ok(())
    }

    fn check_unique(&self) -> Result<(), SyncError> {
        let mut clinic_ids = HashMap::new();
        let mut crm_ids = HashMap::new();
        for row in self.rows.values() {
            if let Some(id) = row.clinic_id() {
                if clinic_ids.insert(id, row.key()).is_some() {
                    return Err(SyncError::DuplicateConflict(format!("clinic id {} already linked", id)));
                }
            }
            if let Some(id) = row.crm_id() {
                if crm_ids.insert(id, row.key()).is_some() {
                    return Err(SyncError::DuplicateConflict(format!("CRM id {} already linked", id)));
                }
            }
        }
        Ok(())
    }

    fn row_mut(&mut self, id: Uuid) -> Result<&mut T, SyncError> {
        self.rows
            .get_mut(&id)
            .ok_or_else(|| SyncError::Repository(format!("row {} does not exist", id)))
    }
}

#[derive(Default)]
pub struct InMemorySyncStateRepository {
    contacts: RwLock<Table<CanonicalContact>>,
    appointments: RwLock<Table<CanonicalAppointment>>,
}

impl InMemorySyncStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all_contacts(&self) -> Vec<CanonicalContact> {
        self.contacts.read().await.rows.values().cloned().collect()
    }

    pub async fn all_appointments(&self) -> Vec<CanonicalAppointment> {
        self.appointments.read().await.rows.values().cloned().collect()
    }
}

#[async_trait]
impl SyncStateRepository for InMemorySyncStateRepository {
    async fn contact(&self, id: Uuid) -> Result<Option<CanonicalContact>, SyncError> {
        Ok(self.contacts.read().await.rows.get(&id).cloned())
    }

    async fn contact_by_crm_id(&self, crm_id: &str) -> Result<Option<CanonicalContact>, SyncError> {
        let table = self.contacts.read().await;
        Ok(table.rows.values().find(|row| row.crm_id() == Some(crm_id)).cloned())
    }

    async fn contacts_by_clinic_ids(&self, clinic_ids: &[String]) -> Result<Vec<CanonicalContact>, SyncError> {
        let table = self.contacts.read().await;
        Ok(table
            .rows
            .values()
            .filter(|row| row.clinic_patient_id.as_ref().is_some_and(|id| clinic_ids.contains(id)))
            .cloned()
            .collect())
    }

    async fn contacts_without_clinic_id(&self) -> Result<Vec<CanonicalContact>, SyncError> {
        let table = self.contacts.read().await;
        Ok(table
            .rows
            .values()
            .filter(|row| row.clinic_patient_id.is_none())
            .cloned()
            .collect())
    }

    async fn contact_candidates(
        &self,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> Result<Vec<CanonicalContact>, SyncError> {
        let phone_key = phone.and_then(phone_match_key);
        let table = self.contacts.read().await;
        Ok(table
            .rows
            .values()
            .filter(|row| {
                let phone_hit = phone_key.is_some() && row.phone.as_deref().and_then(phone_match_key) == phone_key;
                let email_hit = match (email, row.email.as_deref()) {
                    (Some(wanted), Some(stored)) => wanted.eq_ignore_ascii_case(stored),
                    _ => false,
                };
                phone_hit || email_hit
            })
            .cloned()
            .collect())
    }

    async fn insert_contacts(&self, rows: &[CanonicalContact]) -> Result<usize, SyncError> {
        Ok(self.contacts.write().await.insert_ignoring_duplicates(rows))
    }

    async fn update_contacts(&self, rows: &[CanonicalContact]) -> Result<(), SyncError> {
        self.contacts.write().await.update_all(rows)
    }

    async fn set_contact_crm_id(&self, id: Uuid, crm_id: &str) -> Result<(), SyncError> {
        let mut table = self.contacts.write().await;
        if table.holder_of(None, Some(crm_id), id).is_some() {
            return Err(SyncError::DuplicateConflict(format!("CRM id {} already linked", crm_id)));
        }
        let row = table.row_mut(id)?;
        row.crm_contact_id = Some(crm_id.to_string());
        row.last_synced_at = Utc::now();
        Ok(())
    }

    async fn set_contact_clinic_id(&self, id: Uuid, clinic_id: &str) -> Result<(), SyncError> {
        let mut table = self.contacts.write().await;
        if table.holder_of(Some(clinic_id), None, id).is_some() {
            return Err(SyncError::DuplicateConflict(format!("clinic id {} already linked", clinic_id)));
        }
        let row = table.row_mut(id)?;
        row.clinic_patient_id = Some(clinic_id.to_string());
        row.last_synced_at = Utc::now();
        Ok(())
    }

    async fn appointment(&self, id: Uuid) -> Result<Option<CanonicalAppointment>, SyncError> {
        Ok(self.appointments.read().await.rows.get(&id).cloned())
    }

    async fn appointment_by_crm_id(&self, crm_id: &str) -> Result<Option<CanonicalAppointment>, SyncError> {
        let table = self.appointments.read().await;
        Ok(table.rows.values().find(|row| row.crm_id() == Some(crm_id)).cloned())
    }

    async fn appointments_by_clinic_ids(
        &self,
        clinic_ids: &[String],
    ) -> Result<Vec<CanonicalAppointment>, SyncError> {
        let table = self.appointments.read().await;
        Ok(table
            .rows
            .values()
            .filter(|row| row.clinic_appointment_id.as_ref().is_some_and(|id| clinic_ids.contains(id)))
            .cloned()
            .collect())
    }

    async fn insert_appointments(&self, rows: &[CanonicalAppointment]) -> Result<usize, SyncError> {
        Ok(self.appointments.write().await.insert_ignoring_duplicates(rows))
    }

    async fn update_appointments(&self, rows: &[CanonicalAppointment]) -> Result<(), SyncError> {
        self.appointments.write().await.update_all(rows)
    }

    async fn set_appointment_crm_id(&self, id: Uuid, crm_id: &str) -> Result<(), SyncError> {
        let mut table = self.appointments.write().await;
        if table.holder_of(None, Some(crm_id), id).is_some() {
            return Err(SyncError::DuplicateConflict(format!("CRM appointment {} already linked", crm_id)));
        }
        let row = table.row_mut(id)?;
        row.crm_appointment_id = Some(crm_id.to_string());
        row.last_synced_at = Utc::now();
        Ok(())
    }

    async fn set_appointment_clinic_id(&self, id: Uuid, clinic_id: &str) -> Result<(), SyncError> {
        let mut table = self.appointments.write().await;
        if table.holder_of(Some(clinic_id), None, id).is_some() {
            return Err(SyncError::DuplicateConflict(format!(
                "clinic appointment {} already linked",
                clinic_id
            )));
        }
        let row = table.row_mut(id)?;
        row.clinic_appointment_id = Some(clinic_id.to_string());
        row.last_synced_at = Utc::now();
        Ok(())
    }
}
