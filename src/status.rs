//! Condition classification
//!
//! Maps what the cluster reports for a tenant's release onto a
//! [`DomainStatus`]. Classification is a pure function: no I/O, no clock, no
//! state. Inputs are the release's condition list and, when that list is
//! empty, a readiness report for the workloads in the tenant's namespace.
//!
//! Reasons are first tagged with a [`ReasonClass`] through a lookup table of
//! the reason codes Flux's helm-controller emits. Codes missing from the
//! table fall back to keyword families. Anything still unmatched is
//! [`ReasonClass::Unrecognized`]. A `Ready` condition that is not `True` is
//! `pending` only while its reason says work is under way or waiting;
//! every other reason on it, including an empty or unknown one, is `error`.

use crate::crd::{Condition, ConditionStatus};
use crate::tenant::DomainStatus;

/// The condition type that decides readiness
pub const READY_CONDITION: &str = "Ready";

/// Coarse meaning of a condition reason code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReasonClass {
    /// The last operation completed
    Succeeded,
    /// Work is under way
    Progressing,
    /// Waiting on something expected to resolve by itself
    Transient,
    /// An operation failed
    Failure,
    /// Not a known reason
    Unrecognized,
}

/// Known reason codes, matched case-insensitively
const REASON_TABLE: &[(&str, ReasonClass)] = &[
    ("succeeded", ReasonClass::Succeeded),
    ("installsucceeded", ReasonClass::Succeeded),
    ("upgradesucceeded", ReasonClass::Succeeded),
    ("testsucceeded", ReasonClass::Succeeded),
    ("rollbacksucceeded", ReasonClass::Succeeded),
    ("uninstallsucceeded", ReasonClass::Succeeded),
    ("reconciliationsucceeded", ReasonClass::Succeeded),
    ("progressing", ReasonClass::Progressing),
    ("reconciling", ReasonClass::Progressing),
    ("pending", ReasonClass::Progressing),
    ("progressingwithretry", ReasonClass::Transient),
    ("dependencynotready", ReasonClass::Transient),
    ("artifactnotready", ReasonClass::Transient),
    ("failed", ReasonClass::Failure),
    ("installfailed", ReasonClass::Failure),
    ("upgradefailed", ReasonClass::Failure),
    ("testfailed", ReasonClass::Failure),
    ("rollbackfailed", ReasonClass::Failure),
    ("uninstallfailed", ReasonClass::Failure),
    ("reconciliationfailed", ReasonClass::Failure),
    ("artifactfailed", ReasonClass::Failure),
    ("initfailed", ReasonClass::Failure),
    ("getlastreleasefailed", ReasonClass::Failure),
];

const PROGRESS_KEYWORDS: &[&str] = &["progress", "reconcil", "pending"];
const TRANSIENT_KEYWORDS: &[&str] = &["wait", "poll", "retry"];
const FAILURE_KEYWORDS: &[&str] = &["fail", "degrad", "error"];

/// Condition types that signal failure on their own
const FAILURE_TYPES: &[&str] = &["failed", "degraded"];

/// Reasons that are failures whenever their condition is False
const FAILED_OPERATION_REASONS: &[&str] = &["installfailed", "upgradefailed", "reconciliationfailed"];

/// Container waiting reasons that will not clear without intervention
pub const TERMINAL_WAITING_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "ErrImagePull",
    "ImagePullBackOff",
    "CreateContainerConfigError",
    "CreateContainerError",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

impl ReasonClass {
    /// Tag a reason code
    pub fn of(reason: &str) -> Self {
        let reason = reason.trim().to_lowercase();
        if reason.is_empty() {
            return Self::Unrecognized;
        }
        if let Some((_, class)) = REASON_TABLE.iter().find(|(code, _)| *code == reason) {
            return *class;
        }
        if contains_any(&reason, PROGRESS_KEYWORDS) {
            Self::Progressing
        } else if contains_any(&reason, TRANSIENT_KEYWORDS) {
            Self::Transient
        } else if contains_any(&reason, FAILURE_KEYWORDS) {
            Self::Failure
        } else {
            Self::Unrecognized
        }
    }
}

/// Readiness of one container
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerSignal {
    /// Container name
    pub name: String,
    /// Whether the container passes its readiness checks
    pub ready: bool,
    /// Reason the container is waiting, if it is
    pub waiting_reason: Option<String>,
}

/// Readiness of one pod
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkloadSignal {
    /// Pod name
    pub pod: String,
    /// Container statuses; empty when the kubelet has not reported any yet
    pub containers: Vec<ContainerSignal>,
}

impl WorkloadSignal {
    /// All containers report ready. A pod without container statuses is not ready.
    pub fn is_ready(&self) -> bool {
        !self.containers.is_empty() && self.containers.iter().all(|c| c.ready)
    }

    /// Some container is stuck in a terminal waiting state
    pub fn terminal_waiting_reason(&self) -> Option<&str> {
        self.containers
            .iter()
            .filter_map(|c| c.waiting_reason.as_deref())
            .find(|r| TERMINAL_WAITING_REASONS.contains(r))
    }
}

/// Result of the workload fallback query
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum WorkloadReport {
    /// The release reported conditions, so workloads were not consulted
    #[default]
    NotQueried,
    /// Workloads found in the namespace
    Observed(Vec<WorkloadSignal>),
    /// The workload query failed
    Unavailable(String),
}

fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|c| c.type_.eq_ignore_ascii_case(type_))
}

fn is_failure_indicator(condition: &Condition) -> bool {
    let reason = condition.reason.to_lowercase();
    let type_ = condition.type_.to_lowercase();

    ReasonClass::of(&reason) == ReasonClass::Failure
        || contains_any(&reason, FAILURE_KEYWORDS)
        || FAILURE_TYPES.contains(&type_.as_str())
        || (condition.status == ConditionStatus::False
            && FAILED_OPERATION_REASONS.contains(&reason.as_str()))
}

/// Classify a release's conditions, falling back to workload readiness
/// when there are none.
pub fn classify(conditions: &[Condition], fallback: &WorkloadReport) -> DomainStatus {
    if conditions.is_empty() {
        return classify_workloads(fallback);
    }

    if let Some(ready) = find_condition(conditions, READY_CONDITION) {
        return match ready.status {
            ConditionStatus::True => DomainStatus::Active,
            ConditionStatus::False | ConditionStatus::Unknown => {
                match ReasonClass::of(&ready.reason) {
                    ReasonClass::Progressing | ReasonClass::Transient => DomainStatus::Pending,
                    ReasonClass::Failure
                    | ReasonClass::Succeeded
                    | ReasonClass::Unrecognized => DomainStatus::Error,
                }
            }
        };
    }

    if conditions.iter().any(is_failure_indicator) {
        return DomainStatus::Error;
    }

    DomainStatus::Pending
}

/// Classify from workload readiness alone
pub fn classify_workloads(report: &WorkloadReport) -> DomainStatus {
    let workloads = match report {
        WorkloadReport::NotQueried => return DomainStatus::Pending,
        WorkloadReport::Unavailable(_) => return DomainStatus::Error,
        WorkloadReport::Observed(workloads) => workloads,
    };

    if workloads.is_empty() {
        return DomainStatus::Pending;
    }
    if workloads.iter().any(|w| w.terminal_waiting_reason().is_some()) {
        return DomainStatus::Error;
    }
    if workloads.iter().all(WorkloadSignal::is_ready) {
        return DomainStatus::Active;
    }
    DomainStatus::Pending
}
