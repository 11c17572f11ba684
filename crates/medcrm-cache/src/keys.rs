//! Cache key constants and builders for MedCRM
//!
//! Provides standardized, tenant-scoped key naming for every cached domain,
//! ensuring that keys for the same resource are always byte-identical and
//! that no key ever carries data for two clinics.
//!
//! # Key Patterns
//!
//! - `clinic_{clinic_id}:{domain}[:{qualifier}...]` - Tenant data
//! - `session:user_{user_id}` - Active user session (no tenant segment)
//! - `permissions:user_{user_id}` - Resolved user permissions (no tenant segment)
//!
//! Session and permission keys are keyed by user alone because a session
//! spans at most one active clinic at a time. [`belongs_to_tenant`] treats
//! them as belonging to every clinic so tenant sweeps never skip them.
//!
//! # Example
//!
//! ```
//! use medcrm_cache::keys::{self, ClinicId, Domain};
//!
//! let clinic = ClinicId::new(42).unwrap();
//! let key = keys::build_key(clinic, Domain::Contacts, ["list", "page_2"]);
//! assert_eq!(key, "clinic_42:contacts:list:page_2");
//! assert_eq!(keys::extract_tenant_id(&key), Some(42));
//! ```

use chrono::NaiveDate;
use medcrm_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Prefix of the tenant segment
///
/// Format: `clinic_{clinic_id}`
pub const TENANT_PREFIX: &str = "clinic_";

/// Tenant prefix written by older deployments
///
/// Still recognised as tenant-owned and swept with the clinic, but reported
/// by the audit so the keys can be migrated.
pub const LEGACY_TENANT_PREFIX: &str = "tenant_";

/// Prefix for user session keys
///
/// Format: `session:user_{user_id}`
pub const SESSION_PREFIX: &str = "session";

/// Prefix for user permission keys
///
/// Format: `permissions:user_{user_id}`
pub const PERMISSIONS_PREFIX: &str = "permissions";

/// Separator between key segments
pub const SEPARATOR: char = ':';

/// A clinic (tenant) identifier, always positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClinicId(u64);

impl ClinicId {
    /// Validate a raw id coming from a request or database row
    pub fn new(id: i64) -> AppResult<Self> {
        if id <= 0 {
            return Err(AppError::Validation(format!(
                "clinic id must be a positive integer, got {}",
                id
            )));
        }
        Ok(Self(id as u64))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for ClinicId {
    type Error = AppError;

    fn try_from(id: u64) -> Result<Self, Self::Error> {
        if id == 0 {
            return Err(AppError::Validation(
                "clinic id must be a positive integer, got 0".to_string(),
            ));
        }
        Ok(Self(id))
    }
}

impl<'de> Deserialize<'de> for ClinicId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = u64::deserialize(deserializer)?;
        ClinicId::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for ClinicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical data category with its own cache policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Domain {
    Contacts,
    Appointments,
    #[serde(alias = "medical_records")]
    MedicalRecords,
    Pipeline,
    Analytics,
    Settings,
    #[serde(alias = "ai_templates")]
    AiTemplates,
    #[serde(alias = "user_session")]
    UserSession,
}

impl Domain {
    /// Every known domain, in policy table order
    pub const ALL: [Domain; 8] = [
        Domain::Contacts,
        Domain::Appointments,
        Domain::MedicalRecords,
        Domain::Pipeline,
        Domain::Analytics,
        Domain::Settings,
        Domain::AiTemplates,
        Domain::UserSession,
    ];

    /// Segment written into cache keys
    pub fn key_tag(self) -> &'static str {
        match self {
            Domain::Contacts => "contacts",
            Domain::Appointments => "appointments",
            Domain::MedicalRecords => "medical_records",
            Domain::Pipeline => "pipeline",
            Domain::Analytics => "analytics",
            Domain::Settings => "settings",
            Domain::AiTemplates => "ai_templates",
            Domain::UserSession => "user_session",
        }
    }

    /// Name used by the policy table and configuration
    pub fn policy_name(self) -> &'static str {
        match self {
            Domain::Contacts => "contacts",
            Domain::Appointments => "appointments",
            Domain::MedicalRecords => "medicalRecords",
            Domain::Pipeline => "pipeline",
            Domain::Analytics => "analytics",
            Domain::Settings => "settings",
            Domain::AiTemplates => "aiTemplates",
            Domain::UserSession => "userSession",
        }
    }
}

impl FromStr for Domain {
    type Err = AppError;

    /// Accepts the policy name, the key tag, or any casing of either
    /// (`medicalRecords`, `medical_records`, `MEDICAL-RECORDS`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match normalized.as_str() {
            "contacts" => Ok(Domain::Contacts),
            "appointments" => Ok(Domain::Appointments),
            "medicalrecords" => Ok(Domain::MedicalRecords),
            "pipeline" => Ok(Domain::Pipeline),
            "analytics" => Ok(Domain::Analytics),
            "settings" => Ok(Domain::Settings),
            "aitemplates" => Ok(Domain::AiTemplates),
            "usersession" => Ok(Domain::UserSession),
            _ => Err(AppError::Validation(format!("unknown cache domain: {}", s))),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.policy_name())
    }
}

/// Who a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    /// `clinic_{id}:...`
    Tenant(u64),
    /// `session:user_{id}` or `permissions:user_{id}`
    User(u64),
    /// Anything this module did not build
    Unscoped,
}

/// Escape a qualifier so it can neither split a segment nor act as a glob
///
/// Percent-encodes `%`, `:`, `*`, `?`, `[`, `]` and `\`; everything else is
/// kept as-is, so ordinary ids and slugs come out unchanged.
pub fn escape_qualifier(raw: &str) -> Cow<'_, str> {
    const RESERVED: [char; 7] = ['%', ':', '*', '?', '[', ']', '\\'];

    if !raw.contains(&RESERVED[..]) {
        return Cow::Borrowed(raw);
    }

    let mut escaped = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            '*' => escaped.push_str("%2A"),
            '?' => escaped.push_str("%3F"),
            '[' => escaped.push_str("%5B"),
            ']' => escaped.push_str("%5D"),
            '\\' => escaped.push_str("%5C"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

/// Build a tenant-scoped cache key
///
/// # Arguments
///
/// * `clinic` - The owning clinic
/// * `domain` - The data domain
/// * `qualifiers` - Zero or more qualifiers (page, id, search term, date...)
///
/// # Returns
///
/// A cache key in the format `clinic_{clinic}:{domain}[:{qualifier}...]`
///
/// # Example
///
/// ```
/// use medcrm_cache::keys::{build_key, ClinicId, Domain};
///
/// let clinic = ClinicId::new(7).unwrap();
/// assert_eq!(build_key(clinic, Domain::Settings, [] as [&str; 0]), "clinic_7:settings");
/// assert_eq!(build_key(clinic, Domain::Contacts, ["search", "a:b"]), "clinic_7:contacts:search:a%3Ab");
/// ```
pub fn build_key<I, S>(clinic: ClinicId, domain: Domain, qualifiers: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut key = format!("{}{}{}{}", TENANT_PREFIX, clinic, SEPARATOR, domain.key_tag());
    for qualifier in qualifiers {
        key.push(SEPARATOR);
        key.push_str(&escape_qualifier(qualifier.as_ref()));
    }
    key
}

/// Build a pattern matching every key of a clinic
///
/// Format: `clinic_{clinic}:*`
pub fn build_tenant_pattern(clinic: ClinicId) -> String {
    format!("{}{}{}*", TENANT_PREFIX, clinic, SEPARATOR)
}

/// Build a pattern matching every key of a clinic under the legacy prefix
///
/// Format: `tenant_{clinic}:*`
pub fn build_legacy_tenant_pattern(clinic: ClinicId) -> String {
    format!("{}{}{}*", LEGACY_TENANT_PREFIX, clinic, SEPARATOR)
}

/// Patterns covering every key a clinic owns, canonical prefix first
pub fn tenant_patterns(clinic: ClinicId) -> Vec<String> {
    vec![
        build_tenant_pattern(clinic),
        build_legacy_tenant_pattern(clinic),
    ]
}

/// Patterns scanned when auditing a clinic
///
/// Broader than the tenant patterns: any key naming the clinic anywhere is
/// a candidate, whatever its first segment.
pub fn audit_patterns(clinic: ClinicId) -> Vec<String> {
    vec![
        format!("*{}{}*", TENANT_PREFIX, clinic),
        format!("*{}{}*", LEGACY_TENANT_PREFIX, clinic),
    ]
}

/// Build a pattern matching every key of one domain within a clinic
///
/// Format: `clinic_{clinic}:{domain}*`. The pattern has no separator before
/// the wildcard so keys built without qualifiers match too; no domain tag is
/// a prefix of another, so it never reaches into a neighbouring domain.
pub fn build_domain_pattern(clinic: ClinicId, domain: Domain) -> String {
    format!(
        "{}{}{}{}*",
        TENANT_PREFIX,
        clinic,
        SEPARATOR,
        domain.key_tag()
    )
}

/// Classify a key (or key pattern) by its owner
pub fn classify(key: &str) -> KeyScope {
    if let Some(user_id) = user_scoped_id(key) {
        return KeyScope::User(user_id);
    }
    match extract_tenant_id(key) {
        Some(id) => KeyScope::Tenant(id),
        None => KeyScope::Unscoped,
    }
}

/// Extract the clinic id from a tenant key
///
/// Returns `None` for user-scoped keys and anything not built here.
/// Only the canonical decimal form is accepted (`clinic_42`, not `clinic_042`).
pub fn extract_tenant_id(key: &str) -> Option<u64> {
    let segment = key.split(SEPARATOR).next()?;
    let digits = segment
        .strip_prefix(TENANT_PREFIX)
        .or_else(|| segment.strip_prefix(LEGACY_TENANT_PREFIX))?;
    parse_canonical_id(digits)
}

/// Check that a key may be read or evicted on behalf of a clinic
///
/// User-scoped keys belong to whichever clinic the session is active in,
/// so they answer `true` for every clinic.
pub fn belongs_to_tenant(key: &str, clinic: ClinicId) -> bool {
    match classify(key) {
        KeyScope::Tenant(id) => id == clinic.get(),
        KeyScope::User(_) => true,
        KeyScope::Unscoped => false,
    }
}

/// Why an audited key is out of place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditIssue {
    /// Stored under `tenant_{id}:` instead of `clinic_{id}:`
    LegacyPrefix,
    /// Owned by another clinic but names this one
    CrossTenant,
    /// Names the clinic without a tenant prefix, so no tenant sweep removes it
    Unscoped,
}

/// A key naming a clinic outside the clinic's canonical namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditFinding {
    pub key: String,
    pub issue: AuditIssue,
}

/// Return the keys naming the clinic that are not stored under `clinic_{id}:`
///
/// Meant for the result of scanning [`audit_patterns`]. Keys that only
/// match the scan by accident (`clinic_12` when auditing clinic 1) are
/// ignored: the clinic must appear as a whole segment.
pub fn audit_keys<'a, I>(keys: I, clinic: ClinicId) -> Vec<AuditFinding>
where
    I: IntoIterator<Item = &'a String>,
{
    let canonical = format!("{}{}", TENANT_PREFIX, clinic);
    let legacy = format!("{}{}", LEGACY_TENANT_PREFIX, clinic);

    keys.into_iter()
        .filter_map(|key| {
            let issue = audit_key(key, &canonical, &legacy)?;
            Some(AuditFinding {
                key: key.clone(),
                issue,
            })
        })
        .collect()
}

fn audit_key(key: &str, canonical: &str, legacy: &str) -> Option<AuditIssue> {
    let mut segments = key.split(SEPARATOR);
    let head = segments.next()?;
    if head == canonical {
        return None;
    }
    if head == legacy {
        return Some(AuditIssue::LegacyPrefix);
    }
    if !segments.any(|segment| segment == canonical || segment == legacy) {
        return None;
    }
    match classify(key) {
        KeyScope::Tenant(_) => Some(AuditIssue::CrossTenant),
        KeyScope::User(_) | KeyScope::Unscoped => Some(AuditIssue::Unscoped),
    }
}

fn user_scoped_id(key: &str) -> Option<u64> {
    let mut segments = key.splitn(2, SEPARATOR);
    let prefix = segments.next()?;
    if prefix != SESSION_PREFIX && prefix != PERMISSIONS_PREFIX {
        return None;
    }
    let rest = segments.next()?.strip_prefix("user_")?;
    parse_canonical_id(rest)
}

fn parse_canonical_id(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id: u64 = digits.parse().ok()?;
    (id > 0 && id.to_string() == digits).then_some(id)
}

// ==================== Contacts ====================

/// Paginated contact list: `clinic_{c}:contacts:list:page_{page}`
pub fn contacts_list_key(clinic: ClinicId, page: u32) -> String {
    build_key(clinic, Domain::Contacts, ["list".to_string(), format!("page_{}", page)])
}

/// Single contact: `clinic_{c}:contacts:id:{contact_id}`
pub fn contact_key(clinic: ClinicId, contact_id: u64) -> String {
    build_key(clinic, Domain::Contacts, ["id".to_string(), contact_id.to_string()])
}

/// Contact search results, term normalized to lowercase
pub fn contacts_search_key(clinic: ClinicId, term: &str) -> String {
    let term = term.trim().to_lowercase();
    build_key(clinic, Domain::Contacts, ["search", term.as_str()])
}

// ==================== Appointments ====================

/// Appointments on a day: `clinic_{c}:appointments:date:{YYYY-MM-DD}`
pub fn appointments_by_date_key(clinic: ClinicId, date: NaiveDate) -> String {
    build_key(
        clinic,
        Domain::Appointments,
        ["date".to_string(), date.format("%Y-%m-%d").to_string()],
    )
}

/// Appointments in a status: `clinic_{c}:appointments:status:{status}`
pub fn appointments_by_status_key(clinic: ClinicId, status: &str) -> String {
    build_key(clinic, Domain::Appointments, ["status", status])
}

/// Single appointment: `clinic_{c}:appointments:id:{appointment_id}`
pub fn appointment_key(clinic: ClinicId, appointment_id: u64) -> String {
    build_key(
        clinic,
        Domain::Appointments,
        ["id".to_string(), appointment_id.to_string()],
    )
}

/// A professional's agenda for one day
pub fn professional_schedule_key(clinic: ClinicId, professional_id: u64, date: NaiveDate) -> String {
    build_key(
        clinic,
        Domain::Appointments,
        [
            "professional".to_string(),
            professional_id.to_string(),
            date.format("%Y-%m-%d").to_string(),
        ],
    )
}

// ==================== Medical records ====================

/// Single medical record
pub fn medical_record_key(clinic: ClinicId, record_id: u64) -> String {
    build_key(clinic, Domain::MedicalRecords, ["id".to_string(), record_id.to_string()])
}

/// All records of a patient
pub fn patient_records_key(clinic: ClinicId, patient_id: u64) -> String {
    build_key(
        clinic,
        Domain::MedicalRecords,
        ["patient".to_string(), patient_id.to_string()],
    )
}

// ==================== Pipeline ====================

/// Pipeline stage definitions
pub fn pipeline_stages_key(clinic: ClinicId) -> String {
    build_key(clinic, Domain::Pipeline, ["stages"])
}

/// Deals sitting in one stage
pub fn pipeline_deals_key(clinic: ClinicId, stage: &str) -> String {
    build_key(clinic, Domain::Pipeline, ["deals", stage])
}

// ==================== Analytics ====================

/// Dashboard aggregates for a period (`7d`, `30d`, `month`...)
pub fn analytics_dashboard_key(clinic: ClinicId, period: &str) -> String {
    build_key(clinic, Domain::Analytics, ["dashboard", period])
}

/// Named report for a day
pub fn analytics_report_key(clinic: ClinicId, report: &str, date: NaiveDate) -> String {
    build_key(
        clinic,
        Domain::Analytics,
        [
            "report".to_string(),
            report.to_string(),
            date.format("%Y-%m-%d").to_string(),
        ],
    )
}

// ==================== Settings ====================

/// Full clinic settings document: `clinic_{c}:settings`
pub fn settings_key(clinic: ClinicId) -> String {
    build_key(clinic, Domain::Settings, [] as [&str; 0])
}

/// One settings section (`whatsapp`, `business_hours`...)
pub fn settings_section_key(clinic: ClinicId, section: &str) -> String {
    build_key(clinic, Domain::Settings, [section])
}

// ==================== AI templates ====================

/// Single AI assistant template
pub fn ai_template_key(clinic: ClinicId, template_id: u64) -> String {
    build_key(clinic, Domain::AiTemplates, ["id".to_string(), template_id.to_string()])
}

/// All AI templates of a clinic
pub fn ai_templates_list_key(clinic: ClinicId) -> String {
    build_key(clinic, Domain::AiTemplates, ["list"])
}

// ==================== Sessions ====================

/// Clinic-scoped session context of a user (active clinic, role in it)
pub fn session_context_key(clinic: ClinicId, user_id: u64) -> String {
    build_key(clinic, Domain::UserSession, [format!("user_{}", user_id)])
}

/// Build a cache key for a user session
///
/// # Example
///
/// ```
/// use medcrm_cache::keys::session_key;
///
/// assert_eq!(session_key(17), "session:user_17");
/// ```
pub fn session_key(user_id: u64) -> String {
    format!("{}{}user_{}", SESSION_PREFIX, SEPARATOR, user_id)
}

/// Build a cache key for resolved user permissions
///
/// Format: `permissions:user_{user_id}`
pub fn permissions_key(user_id: u64) -> String {
    format!("{}{}user_{}", PERMISSIONS_PREFIX, SEPARATOR, user_id)
}
