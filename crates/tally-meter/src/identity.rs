//! Resource identity resolution
//!
//! Folds every observed entity into the `(kind, name)` its usage is billed
//! under. Workload instances walk an ordered rule table; everything else maps
//! directly from its own kind and name.

use tally_common::{EntityIdentity, EntityKind, NetworkService, VolumeClaim, WorkloadInstance};

/// Label marking instances managed by the database operator
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Database operator name in [`MANAGED_BY_LABEL`]
pub const DATABASE_OPERATOR: &str = "kubeblocks";
/// Database cluster name
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const TERMINAL_LABEL: &str = "TerminalID";
pub const APP_LABEL: &str = "app";
pub const JOB_LABEL: &str = "job-name";
/// Hash suffix ReplicaSets append to their Deployment's name
pub const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// One step of workload identity resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadRule {
    /// `key=value` is set; the name comes from `name_label`
    LabelEquals {
        key: &'static str,
        value: &'static str,
        name_label: &'static str,
        kind: EntityKind,
    },
    /// `key` is set; the name is its value
    LabelPresent { key: &'static str, kind: EntityKind },
    /// The controlling owner reference
    Owner,
}

impl WorkloadRule {
    fn apply(&self, instance: &WorkloadInstance) -> Option<EntityIdentity> {
        match self {
            WorkloadRule::LabelEquals {
                key,
                value,
                name_label,
                kind,
            } => {
                if instance.labels.get(*key).map(String::as_str) != Some(*value) {
                    return None;
                }
                let name = instance.labels.get(*name_label)?;
                Some(EntityIdentity::new(kind.clone(), name.clone()))
            }
            WorkloadRule::LabelPresent { key, kind } => {
                let value = instance.labels.get(*key).filter(|v| !v.is_empty())?;
                let name = if *kind == EntityKind::Job {
                    cron_job_name(value, instance)
                } else {
                    value.as_str()
                };
                Some(EntityIdentity::new(kind.clone(), name))
            }
            WorkloadRule::Owner => {
                let owner = instance.controller()?;
                if owner.kind == "ReplicaSet" {
                    let hash = instance.labels.get(POD_TEMPLATE_HASH_LABEL);
                    if let Some(name) = hash.and_then(|h| deployment_name(&owner.name, h)) {
                        return Some(EntityIdentity::new(
                            EntityKind::Workload("Deployment".into()),
                            name,
                        ));
                    }
                }
                Some(EntityIdentity::new(
                    EntityKind::Workload(owner.kind.clone()),
                    owner.name.clone(),
                ))
            }
        }
    }
}

/// Deployment owning a ReplicaSet, when the name ends in its template hash
fn deployment_name<'a>(replica_set: &'a str, hash: &str) -> Option<&'a str> {
    replica_set
        .strip_suffix(hash)?
        .strip_suffix('-')
        .filter(|name| !name.is_empty())
}

/// Digits in a CronJob's scheduled-minute suffix, minutes since the epoch
const CRON_SUFFIX_MIN_DIGITS: usize = 8;

/// Fold a CronJob run's Job name back to the CronJob.
///
/// Only Job-controlled instances whose name ends in the scheduled-minute
/// suffix are folded; `backup-2024` stays as it is.
fn cron_job_name<'a>(job: &'a str, instance: &WorkloadInstance) -> &'a str {
    let job_controlled = instance
        .controller()
        .is_some_and(|owner| owner.kind == "Job" && owner.name == job);
    if !job_controlled {
        return job;
    }
    match job.rsplit_once('-') {
        Some((name, suffix))
            if !name.is_empty()
                && suffix.len() >= CRON_SUFFIX_MIN_DIGITS
                && suffix.chars().all(|c| c.is_ascii_digit()) =>
        {
            name
        }
        _ => job,
    }
}

/// Maps observed entities to billing identities
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    rules: Vec<WorkloadRule>,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(vec![
            WorkloadRule::LabelEquals {
                key: MANAGED_BY_LABEL,
                value: DATABASE_OPERATOR,
                name_label: INSTANCE_LABEL,
                kind: EntityKind::Database,
            },
            WorkloadRule::LabelPresent {
                key: TERMINAL_LABEL,
                kind: EntityKind::Terminal,
            },
            WorkloadRule::LabelPresent {
                key: APP_LABEL,
                kind: EntityKind::App,
            },
            WorkloadRule::LabelPresent {
                key: JOB_LABEL,
                kind: EntityKind::Job,
            },
            WorkloadRule::Owner,
        ])
    }
}

impl IdentityResolver {
    pub fn new(rules: Vec<WorkloadRule>) -> Self {
        Self { rules }
    }

    /// First matching rule wins; unmatched instances bill as themselves
    pub fn workload(&self, instance: &WorkloadInstance) -> EntityIdentity {
        self.rules
            .iter()
            .find_map(|rule| rule.apply(instance))
            .unwrap_or_else(|| EntityIdentity::new(EntityKind::Pod, instance.name.clone()))
    }

    pub fn claim(claim: &VolumeClaim) -> EntityIdentity {
        EntityIdentity::new(EntityKind::VolumeClaim, claim.name.clone())
    }

    pub fn service(service: &NetworkService) -> EntityIdentity {
        EntityIdentity::new(EntityKind::NodePort, service.name.clone())
    }

    pub fn bucket(bucket: &str) -> EntityIdentity {
        EntityIdentity::new(EntityKind::ObjectStorage, bucket)
    }

    /// Synthetic identity shared by all GPU usage of one product
    pub fn gpu(product: &str) -> EntityIdentity {
        EntityIdentity::new(EntityKind::Gpu, product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tally_common::{InstancePhase, OwnerReference};

    fn instance(labels: &[(&str, &str)], owners: Vec<OwnerReference>) -> WorkloadInstance {
        WorkloadInstance {
            name: "web-7d9f8c6b5-x2x4z".into(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            owners,
            node_name: Some("node-1".into()),
            phase: InstancePhase::Running,
            started_at: None,
            finished_at: None,
            containers: vec![],
        }
    }

    fn owner(kind: &str, name: &str) -> OwnerReference {
        OwnerReference {
            kind: kind.into(),
            name: name.into(),
            controller: true,
        }
    }

    #[test]
    fn test_database_wins_over_app() {
        let resolver = IdentityResolver::default();
        let pod = instance(
            &[
                (MANAGED_BY_LABEL, DATABASE_OPERATOR),
                (INSTANCE_LABEL, "orders-pg"),
                (APP_LABEL, "postgres"),
            ],
            vec![owner("StatefulSet", "orders-pg-postgresql")],
        );
        assert_eq!(
            resolver.workload(&pod),
            EntityIdentity::new(EntityKind::Database, "orders-pg")
        );
    }

    #[test]
    fn test_other_operator_falls_through() {
        let resolver = IdentityResolver::default();
        let pod = instance(
            &[(MANAGED_BY_LABEL, "helm"), (INSTANCE_LABEL, "x"), (APP_LABEL, "web")],
            vec![],
        );
        assert_eq!(resolver.workload(&pod), EntityIdentity::new(EntityKind::App, "web"));
    }

    #[test]
    fn test_terminal_and_job() {
        let resolver = IdentityResolver::default();
        let terminal = instance(&[(TERMINAL_LABEL, "term-alice"), (APP_LABEL, "ttyd")], vec![]);
        assert_eq!(
            resolver.workload(&terminal),
            EntityIdentity::new(EntityKind::Terminal, "term-alice")
        );

        let run = "nightly-report-28471230";
        let job = instance(&[(JOB_LABEL, run)], vec![owner("Job", run)]);
        assert_eq!(
            resolver.workload(&job),
            EntityIdentity::new(EntityKind::Job, "nightly-report")
        );

        let plain_job = instance(&[(JOB_LABEL, "migrate-v2")], vec![owner("Job", "migrate-v2")]);
        assert_eq!(
            resolver.workload(&plain_job),
            EntityIdentity::new(EntityKind::Job, "migrate-v2")
        );
    }

    #[test]
    fn test_only_scheduled_job_runs_fold() {
        let resolver = IdentityResolver::default();
        let dated = instance(&[(JOB_LABEL, "backup-2024")], vec![owner("Job", "backup-2024")]);
        assert_eq!(resolver.workload(&dated).name, "backup-2024");

        // label alone, no Job controller
        let orphan = instance(&[(JOB_LABEL, "nightly-report-28471230")], vec![]);
        assert_eq!(resolver.workload(&orphan).name, "nightly-report-28471230");
    }

    #[test]
    fn test_replica_set_folds_to_deployment() {
        let resolver = IdentityResolver::default();
        let pod = instance(
            &[(POD_TEMPLATE_HASH_LABEL, "7d9f8c6b5")],
            vec![owner("ReplicaSet", "api-server-7d9f8c6b5")],
        );
        assert_eq!(
            resolver.workload(&pod),
            EntityIdentity::new(EntityKind::Workload("Deployment".into()), "api-server")
        );

        // without the hash label the ReplicaSet bills as itself
        let pod = instance(&[], vec![owner("ReplicaSet", "my-rs")]);
        assert_eq!(
            resolver.workload(&pod),
            EntityIdentity::new(EntityKind::Workload("ReplicaSet".into()), "my-rs")
        );

        // hash label that is not the name's suffix
        let pod = instance(
            &[(POD_TEMPLATE_HASH_LABEL, "abc123")],
            vec![owner("ReplicaSet", "api-server-7d9f8c6b5")],
        );
        assert_eq!(resolver.workload(&pod).name, "api-server-7d9f8c6b5");
    }

    #[test]
    fn test_other_owner_and_bare_pod() {
        let resolver = IdentityResolver::default();
        let pod = instance(&[], vec![owner("StatefulSet", "cache")]);
        assert_eq!(
            resolver.workload(&pod),
            EntityIdentity::new(EntityKind::Workload("StatefulSet".into()), "cache")
        );

        let bare = instance(&[], vec![]);
        assert_eq!(
            resolver.workload(&bare),
            EntityIdentity::new(EntityKind::Pod, "web-7d9f8c6b5-x2x4z")
        );
    }

    #[test]
    fn test_empty_label_value_ignored() {
        let resolver = IdentityResolver::default();
        let pod = instance(&[(APP_LABEL, "")], vec![]);
        assert_eq!(resolver.workload(&pod).kind, EntityKind::Pod);
    }

    #[test]
    fn test_direct_identities() {
        assert_eq!(IdentityResolver::gpu("A100").kind, EntityKind::Gpu);
        assert_eq!(IdentityResolver::bucket("alice-assets").kind, EntityKind::ObjectStorage);
    }
}
