//! Decides whether an inbound contact already has a canonical row.
//!
//! Primary match is by the upstream id on either side. Without one, the phone
//! (compared through [`phone_match_key`]) links the candidate to a row that is
//! not yet bound to a different id on the candidate's own side. Everything
//! here is pure; callers persist.

use std::cmp::Ordering;

use chrono::Utc;

use clinic_cell::ClinicPatient;
use shared_models::sync::{CanonicalContact, RecordSource};
use shared_utils::phone_match_key;

use crate::models::{MatchAction, MatchDecision, MatchedBy};

pub fn resolve(candidate: &CanonicalContact, pool: &[CanonicalContact]) -> MatchDecision {
    if let Some((existing, matched_by)) = primary_match(candidate, pool) {
        let action = if reflects(existing, candidate) {
            MatchAction::Skip
        } else {
            MatchAction::Update
        };
        return MatchDecision {
            existing: Some(existing.clone()),
            action,
            matched_by: Some(matched_by),
        };
    }

    match phone_match(candidate, pool) {
        Some(existing) => MatchDecision {
            existing: Some(existing.clone()),
            action: MatchAction::Update,
            matched_by: Some(MatchedBy::Phone),
        },
        None => MatchDecision::create(),
    }
}

fn primary_match<'a>(
    candidate: &CanonicalContact,
    pool: &'a [CanonicalContact],
) -> Option<(&'a CanonicalContact, MatchedBy)> {
    if let Some(clinic_id) = &candidate.clinic_patient_id {
        if let Some(row) = pool.iter().find(|row| row.clinic_patient_id.as_ref() == Some(clinic_id)) {
            return Some((row, MatchedBy::ClinicId));
        }
    }
    if let Some(crm_id) = &candidate.crm_contact_id {
        if let Some(row) = pool.iter().find(|row| row.crm_contact_id.as_ref() == Some(crm_id)) {
            return Some((row, MatchedBy::CrmId));
        }
    }
    None
}

fn phone_match<'a>(candidate: &CanonicalContact, pool: &'a [CanonicalContact]) -> Option<&'a CanonicalContact> {
    let key = candidate.phone.as_deref().and_then(phone_match_key)?;

    pool.iter()
        .filter(|row| !bound_elsewhere(row, candidate))
        .filter(|row| row.phone.as_deref().and_then(phone_match_key).as_deref() == Some(key.as_str()))
        .max_by(|a, b| rank(a, b, candidate))
}

/// The row already carries a different id on the candidate's own side.
fn bound_elsewhere(row: &CanonicalContact, candidate: &CanonicalContact) -> bool {
    let differs = |row_id: &Option<String>, own_id: &Option<String>| {
        matches!((row_id, own_id), (Some(row_id), Some(own_id)) if row_id != own_id)
    };
    match candidate.source {
        RecordSource::Clinic => differs(&row.clinic_patient_id, &candidate.clinic_patient_id),
        RecordSource::Crm => differs(&row.crm_contact_id, &candidate.crm_contact_id),
    }
}

/// Orders phone matches: a row holding the id the candidate lacks wins, then
/// email agreement, then the most recently synced.
fn rank(a: &CanonicalContact, b: &CanonicalContact, candidate: &CanonicalContact) -> Ordering {
    let has_other_side = |row: &CanonicalContact| match candidate.source {
        RecordSource::Clinic => row.crm_contact_id.is_some(),
        RecordSource::Crm => row.clinic_patient_id.is_some(),
    };
    let same_email = |row: &CanonicalContact| match (&row.email, &candidate.email) {
        (Some(row_email), Some(email)) => row_email.eq_ignore_ascii_case(email),
        _ => false,
    };

    has_other_side(a)
        .cmp(&has_other_side(b))
        .then_with(|| same_email(a).cmp(&same_email(b)))
        .then_with(|| a.last_synced_at.cmp(&b.last_synced_at))
}

/// A Clinic candidate carrying the row's own patient id speaks for the system
/// of record: its attributes replace the stored ones, absent values included.
fn is_authoritative(existing: &CanonicalContact, candidate: &CanonicalContact) -> bool {
    candidate.source == RecordSource::Clinic
        && candidate.clinic_patient_id.is_some()
        && existing.clinic_patient_id == candidate.clinic_patient_id
}

/// Nothing a merge would change: ids the candidate carries are stored, and
/// attributes match (exactly when authoritative, otherwise where present).
fn reflects(existing: &CanonicalContact, candidate: &CanonicalContact) -> bool {
    fn covered<T: PartialEq>(stored: &Option<T>, incoming: &Option<T>) -> bool {
        incoming.is_none() || stored == incoming
    }

    let exact = is_authoritative(existing, candidate);
    let attribute = |stored: &Option<String>, incoming: &Option<String>| {
        if exact {
            stored == incoming
        } else {
            covered(stored, incoming)
        }
    };
    let sex = if exact {
        existing.sex == candidate.sex
    } else {
        covered(&existing.sex, &candidate.sex)
    };

    covered(&existing.clinic_patient_id, &candidate.clinic_patient_id)
        && covered(&existing.crm_contact_id, &candidate.crm_contact_id)
        && attribute(&existing.email, &candidate.email)
        && attribute(&existing.phone, &candidate.phone)
        && attribute(&existing.first_name, &candidate.first_name)
        && attribute(&existing.last_name, &candidate.last_name)
        && attribute(&existing.salutation, &candidate.salutation)
        && attribute(&existing.street, &candidate.street)
        && attribute(&existing.zip, &candidate.zip)
        && attribute(&existing.city, &candidate.city)
        && attribute(&existing.birth_date, &candidate.birth_date)
        && sex
}

/// Folds the candidate into the stored row. Ids are only ever filled in and
/// the row keeps its own key, source and creation time. Attributes are
/// replaced wholesale when the candidate is authoritative for the row;
/// otherwise only present values win.
pub fn merge_candidate(existing: &CanonicalContact, candidate: &CanonicalContact) -> CanonicalContact {
    let overwrite = is_authoritative(existing, candidate);
    let take = |stored: &Option<String>, incoming: &Option<String>| {
        if overwrite {
            incoming.clone()
        } else {
            incoming.clone().or_else(|| stored.clone())
        }
    };

    CanonicalContact {
        id: existing.id,
        clinic_patient_id: existing.clinic_patient_id.clone().or_else(|| candidate.clinic_patient_id.clone()),
        crm_contact_id: existing.crm_contact_id.clone().or_else(|| candidate.crm_contact_id.clone()),
        email: take(&existing.email, &candidate.email),
        phone: take(&existing.phone, &candidate.phone),
        first_name: take(&existing.first_name, &candidate.first_name),
        last_name: take(&existing.last_name, &candidate.last_name),
        salutation: take(&existing.salutation, &candidate.salutation),
        street: take(&existing.street, &candidate.street),
        zip: take(&existing.zip, &candidate.zip),
        city: take(&existing.city, &candidate.city),
        birth_date: take(&existing.birth_date, &candidate.birth_date),
        sex: if overwrite { candidate.sex } else { candidate.sex.or(existing.sex) },
        source: existing.source,
        last_synced_at: Utc::now(),
        created_at: existing.created_at,
    }
}

/// First active Clinic patient whose phone matches `phone`.
pub fn find_patient_by_phone<'a>(phone: &str, patients: &'a [ClinicPatient]) -> Option<&'a ClinicPatient> {
    let key = phone_match_key(phone)?;
    patients
        .iter()
        .find(|patient| patient.phone.as_deref().and_then(phone_match_key).as_deref() == Some(key.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn clinic_row(clinic_id: &str, phone: &str) -> CanonicalContact {
        let mut row = CanonicalContact::new(RecordSource::Clinic);
        row.clinic_patient_id = Some(clinic_id.to_string());
        row.phone = Some(phone.to_string());
        row
    }

    fn crm_candidate(crm_id: &str, phone: Option<&str>) -> CanonicalContact {
        let mut candidate = CanonicalContact::new(RecordSource::Crm);
        candidate.crm_contact_id = Some(crm_id.to_string());
        candidate.phone = phone.map(str::to_string);
        candidate
    }

    #[test]
    fn test_primary_match_by_id() {
        let mut row = clinic_row("42", "+41791234567");
        row.crm_contact_id = Some("abc".to_string());
        let pool = vec![clinic_row("7", "0790000000"), row.clone()];

        let decision = resolve(&crm_candidate("abc", None), &pool);
        assert_eq!(decision.matched_by, Some(MatchedBy::CrmId));
        assert_eq!(decision.action, MatchAction::Skip);
        assert_eq!(decision.existing.map(|e| e.id), Some(row.id));
    }

    #[test]
    fn test_changed_attribute_on_primary_match_is_update() {
        let pool = vec![clinic_row("42", "+41791234567")];
        let mut candidate = clinic_row("42", "+41791234567");
        candidate.email = Some("anna@example.com".to_string());

        let decision = resolve(&candidate, &pool);
        assert_eq!(decision.action, MatchAction::Update);
        assert_eq!(decision.matched_by, Some(MatchedBy::ClinicId));
    }

    #[test]
    fn test_phone_fallback_across_formats() {
        let pool = vec![clinic_row("42", "+41 79 123 45 67")];
        let decision = resolve(&crm_candidate("abc", Some("0791234567")), &pool);

        assert_eq!(decision.action, MatchAction::Update);
        assert_eq!(decision.matched_by, Some(MatchedBy::Phone));

        let decision = resolve(&crm_candidate("abc", Some("0041791234567")), &pool);
        assert_eq!(decision.matched_by, Some(MatchedBy::Phone));
    }

    #[test]
    fn test_no_phone_means_create() {
        let pool = vec![clinic_row("42", "+41791234567")];
        assert_eq!(resolve(&crm_candidate("abc", None), &pool).action, MatchAction::Create);
    }

    #[test]
    fn test_row_bound_to_other_id_is_not_a_candidate() {
        let mut other = clinic_row("42", "+41791234567");
        other.crm_contact_id = Some("zzz".to_string());

        let decision = resolve(&crm_candidate("abc", Some("0791234567")), &[other]);
        assert_eq!(decision.action, MatchAction::Create);
    }

    #[test]
    fn test_tie_break_prefers_missing_side_then_recency() {
        let mut unlinked = CanonicalContact::new(RecordSource::Crm);
        unlinked.phone = Some("0791234567".to_string());
        let with_clinic = clinic_row("42", "+41791234567");

        let pool = vec![with_clinic.clone(), unlinked];
        let decision = resolve(&crm_candidate("abc", Some("079 123 45 67")), &pool);
        assert_eq!(decision.existing.map(|e| e.id), Some(with_clinic.id));

        let mut older = clinic_row("1", "0791234567");
        older.last_synced_at = Utc::now() - Duration::days(3);
        let newer = clinic_row("2", "0791234567");
        let pool = vec![older, newer.clone()];
        let decision = resolve(&crm_candidate("abc", Some("0791234567")), &pool);
        assert_eq!(decision.existing.map(|e| e.id), Some(newer.id));
    }

    #[test]
    fn test_email_breaks_ties_within_phone_matches() {
        let mut first = clinic_row("1", "0791234567");
        first.email = Some("someone@example.com".to_string());
        first.last_synced_at = Utc::now() + Duration::minutes(5);
        let mut second = clinic_row("2", "0791234567");
        second.email = Some("Anna@Example.com".to_string());

        let mut candidate = crm_candidate("abc", Some("0791234567"));
        candidate.email = Some("anna@example.com".to_string());

        let decision = resolve(&candidate, &[first, second.clone()]);
        assert_eq!(decision.existing.map(|e| e.id), Some(second.id));
    }

    #[test]
    fn test_merge_keeps_identity_and_fills_ids() {
        let mut existing = clinic_row("42", "+41791234567");
        existing.email = Some("old@example.com".to_string());
        let mut candidate = crm_candidate("abc", Some("0791234567"));
        candidate.first_name = Some("Anna".to_string());

        let merged = merge_candidate(&existing, &candidate);
        assert_eq!(merged.id, existing.id);
        assert_eq!(merged.source, RecordSource::Clinic);
        assert_eq!(merged.clinic_patient_id.as_deref(), Some("42"));
        assert_eq!(merged.crm_contact_id.as_deref(), Some("abc"));
        assert_eq!(merged.email.as_deref(), Some("old@example.com"));
        assert_eq!(merged.phone.as_deref(), Some("0791234567"));
        assert_eq!(merged.first_name.as_deref(), Some("Anna"));
    }

    #[test]
    fn test_clinic_candidate_clears_fields_on_its_own_row() {
        let mut existing = clinic_row("42", "+41791234567");
        existing.email = Some("old@example.com".to_string());
        existing.crm_contact_id = Some("abc".to_string());
        let candidate = clinic_row("42", "+41791234567");

        let decision = resolve(&candidate, &[existing.clone()]);
        assert_eq!(decision.action, MatchAction::Update);

        let merged = merge_candidate(&existing, &candidate);
        assert!(merged.email.is_none());
        assert_eq!(merged.crm_contact_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_find_patient_by_phone() {
        let patients: Vec<ClinicPatient> = serde_json::from_value(serde_json::json!([
            { "id": 1, "phone": "0790000000" },
            { "id": 42, "phone": "+41 79 123 45 67" }
        ]))
        .unwrap();

        assert_eq!(find_patient_by_phone("0791234567", &patients).map(|p| p.id.as_str()), Some("42"));
        assert!(find_patient_by_phone("0311111111", &patients).is_none());
        assert!(find_patient_by_phone("", &patients).is_none());
    }
}
