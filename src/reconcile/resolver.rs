//! Desired-state resolution for the server config.

use super::document::{Snapshot, scalar_to_string};
use super::secret::{SecretCheck, classify_secret, mask_secret};
use crate::config::{MissingUrlPolicy, SecretSettings};
use serde_yaml::{Mapping, Value};
use std::path::PathBuf;

/// The single action the reconciler should take next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No config yet: copy this template into place
    CreateFromTemplate(PathBuf),
    /// Structure is outdated: replace from this template (with backup, after approval)
    UpgradeSchema(PathBuf),
    /// Structure is fine but the secret is unusable
    NeedsSecret(SecretProblem),
    /// A usable secret is present; offer rotation. Holds a masked preview.
    SecretPresentConfirmRequired(String),
    UpToDate,
}

/// Why the current secret cannot be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretProblem {
    Missing,
    Empty,
    Placeholder,
    /// Secret key holds a mapping or sequence
    NotAScalar,
}

impl std::fmt::Display for SecretProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretProblem::Missing => write!(f, "secret is missing"),
            SecretProblem::Empty => write!(f, "secret is empty"),
            SecretProblem::Placeholder => write!(f, "secret is still the template placeholder"),
            SecretProblem::NotAScalar => write!(f, "secret is not a plain value"),
        }
    }
}

/// Non-blocking findings reported alongside a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// The section has no url field; the server falls back to its default
    MissingUrl { section: String },
    /// The stored secret is neither UUID-shaped nor long
    WeakSecret { preview: String },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationWarning::MissingUrl { section } => {
                write!(f, "{} has no url field; the default url will be used", section)
            }
            ValidationWarning::WeakSecret { preview } => {
                write!(f, "stored secret {} does not look like a server secret", preview)
            }
        }
    }
}

/// A decision plus any warnings found on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub decision: Decision,
    pub warnings: Vec<ValidationWarning>,
}

impl Resolution {
    fn new(decision: Decision) -> Self {
        Self {
            decision,
            warnings: Vec::new(),
        }
    }
}

/// Pure function from a snapshot to a [`Decision`].
#[derive(Debug, Clone)]
pub struct Resolver {
    settings: SecretSettings,
    template: PathBuf,
    offer_rotation: bool,
}

impl Resolver {
    pub fn new(settings: SecretSettings, template: PathBuf) -> Self {
        Self {
            settings,
            template,
            offer_rotation: true,
        }
    }

    /// When false, a usable secret resolves to [`Decision::UpToDate`]
    /// instead of asking whether to replace it.
    pub fn offer_rotation(mut self, offer: bool) -> Self {
        self.offer_rotation = offer;
        self
    }

    pub fn resolve(&self, snapshot: &Snapshot) -> Resolution {
        let doc = match snapshot {
            Snapshot::Absent => {
                return Resolution::new(Decision::CreateFromTemplate(self.template.clone()));
            }
            Snapshot::Present(doc) => doc,
        };

        let Some(root) = doc.value().as_mapping() else {
            return Resolution::new(Decision::UpgradeSchema(self.template.clone()));
        };
        // A bare `manager-api:` header parses as null and counts as an empty
        // section; only an absent key or a scalar value is an outdated schema.
        let empty = Mapping::new();
        let section = match root.get(self.settings.section.as_str()) {
            Some(Value::Mapping(section)) => section,
            Some(Value::Null) => &empty,
            _ => return Resolution::new(Decision::UpgradeSchema(self.template.clone())),
        };

        let mut warnings = Vec::new();
        let has_url = section
            .get(self.settings.url_key.as_str())
            .is_some_and(|v| !v.is_null());
        if !has_url {
            match self.settings.missing_url {
                MissingUrlPolicy::Upgrade => {
                    return Resolution::new(Decision::UpgradeSchema(self.template.clone()));
                }
                MissingUrlPolicy::Warn => warnings.push(ValidationWarning::MissingUrl {
                    section: self.settings.section.clone(),
                }),
            }
        }

        let secret = match section.get(self.settings.secret_key.as_str()) {
            None => Err(SecretProblem::Missing),
            Some(Value::Null) => Err(SecretProblem::Empty),
            Some(value) => scalar_to_string(value).ok_or(SecretProblem::NotAScalar),
        };

        let decision = match secret {
            Err(problem) => Decision::NeedsSecret(problem),
            Ok(secret) => match classify_secret(&secret, &self.settings.placeholder) {
                SecretCheck::Empty => Decision::NeedsSecret(SecretProblem::Empty),
                SecretCheck::Placeholder => Decision::NeedsSecret(SecretProblem::Placeholder),
                check => {
                    let preview = mask_secret(secret.trim());
                    if check == SecretCheck::Weak {
                        warnings.push(ValidationWarning::WeakSecret {
                            preview: preview.clone(),
                        });
                    }
                    if self.offer_rotation {
                        Decision::SecretPresentConfirmRequired(preview)
                    } else {
                        Decision::UpToDate
                    }
                }
            },
        };

        Resolution { decision, warnings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::ConfigDocument;
    use std::path::Path;

    const UUID: &str = "f47ac10b-58cc-4372-a567-0e02b2c3d479";

    fn resolver() -> Resolver {
        Resolver::new(SecretSettings::default(), PathBuf::from("config_from_api.yaml"))
    }

    fn snapshot(raw: &str) -> Snapshot {
        Snapshot::Present(ConfigDocument::parse(Path::new(".config.yaml"), raw.to_string()).unwrap())
    }

    #[test]
    fn test_absent_creates_from_template() {
        let resolution = resolver().resolve(&Snapshot::Absent);
        assert_eq!(
            resolution.decision,
            Decision::CreateFromTemplate(PathBuf::from("config_from_api.yaml"))
        );
    }

    #[test]
    fn test_missing_section_upgrades() {
        let resolution = resolver().resolve(&snapshot("server:\n  port: 8000\n"));
        assert!(matches!(resolution.decision, Decision::UpgradeSchema(_)));
    }

    #[test]
    fn test_non_mapping_root_upgrades() {
        assert!(matches!(
            resolver().resolve(&snapshot("")).decision,
            Decision::UpgradeSchema(_)
        ));
        assert!(matches!(
            resolver().resolve(&snapshot("manager-api: just a string\n")).decision,
            Decision::UpgradeSchema(_)
        ));
    }

    #[test]
    fn test_empty_section_header_needs_secret() {
        let resolution = resolver().resolve(&snapshot("server:\n  port: 8000\nmanager-api:\n"));
        assert_eq!(
            resolution.decision,
            Decision::NeedsSecret(SecretProblem::Missing)
        );
        assert_eq!(
            resolution.warnings,
            vec![ValidationWarning::MissingUrl {
                section: "manager-api".to_string()
            }]
        );
    }

    #[test]
    fn test_placeholder_needs_secret() {
        let raw = "manager-api:\n  url: http://127.0.0.1:8002/xiaozhi\n  secret: 你的server.secret值\n";
        assert_eq!(
            resolver().resolve(&snapshot(raw)).decision,
            Decision::NeedsSecret(SecretProblem::Placeholder)
        );
    }

    #[test]
    fn test_empty_and_missing_secret_need_secret() {
        let empty = "manager-api:\n  url: http://x\n  secret:\n";
        let blank = "manager-api:\n  url: http://x\n  secret: ''\n";
        let missing = "manager-api:\n  url: http://x\n";
        assert_eq!(
            resolver().resolve(&snapshot(empty)).decision,
            Decision::NeedsSecret(SecretProblem::Empty)
        );
        assert_eq!(
            resolver().resolve(&snapshot(blank)).decision,
            Decision::NeedsSecret(SecretProblem::Empty)
        );
        assert_eq!(
            resolver().resolve(&snapshot(missing)).decision,
            Decision::NeedsSecret(SecretProblem::Missing)
        );
    }

    #[test]
    fn test_valid_secret_offers_rotation_with_masked_preview() {
        let raw = format!("manager-api:\n  url: http://x\n  secret: {}\n", UUID);
        let resolution = resolver().resolve(&snapshot(&raw));
        assert_eq!(
            resolution.decision,
            Decision::SecretPresentConfirmRequired("f47a...d479".to_string())
        );
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn test_valid_secret_without_rotation_is_up_to_date() {
        let raw = format!("manager-api:\n  url: http://x\n  secret: {}\n", UUID);
        let resolution = resolver().offer_rotation(false).resolve(&snapshot(&raw));
        assert_eq!(resolution.decision, Decision::UpToDate);
    }

    #[test]
    fn test_missing_url_warns_by_default() {
        let raw = format!("manager-api:\n  secret: {}\n", UUID);
        let resolution = resolver().resolve(&snapshot(&raw));
        assert!(matches!(
            resolution.decision,
            Decision::SecretPresentConfirmRequired(_)
        ));
        assert_eq!(
            resolution.warnings,
            vec![ValidationWarning::MissingUrl {
                section: "manager-api".to_string()
            }]
        );
    }

    #[test]
    fn test_missing_url_upgrades_under_strict_policy() {
        let settings = SecretSettings {
            missing_url: MissingUrlPolicy::Upgrade,
            ..SecretSettings::default()
        };
        let raw = format!("manager-api:\n  secret: {}\n", UUID);
        let resolution =
            Resolver::new(settings, PathBuf::from("t.yaml")).resolve(&snapshot(&raw));
        assert_eq!(
            resolution.decision,
            Decision::UpgradeSchema(PathBuf::from("t.yaml"))
        );
    }

    #[test]
    fn test_weak_stored_secret_is_flagged_not_rejected() {
        let raw = "manager-api:\n  url: http://x\n  secret: 12345\n";
        let resolution = resolver().resolve(&snapshot(raw));
        assert!(matches!(
            resolution.decision,
            Decision::SecretPresentConfirmRequired(_)
        ));
        assert!(matches!(
            resolution.warnings.as_slice(),
            [ValidationWarning::WeakSecret { .. }]
        ));
    }
}
