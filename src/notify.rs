//! Notification fan-out

use crate::api::MergebotApi;
use crate::config::NotifierConfig;
use crate::error::Result;
use serde_json::Value;
use tracing::{debug, error, warn};

/// Send `message` about a branch through every configured notifier.
///
/// Failures are logged per notifier and never returned.
pub async fn notify_task_status(
    api: &dyn MergebotApi,
    owner: &str,
    message: &str,
    notifiers: &[NotifierConfig],
) {
    for notifier in notifiers {
        if let Err(e) = notify_one(api, owner, message, notifier).await {
            error!(
                notifier = %notifier.name,
                error = %e,
                "Error notifying task status message '{message}'"
            );
        }
    }
}

async fn notify_one(
    api: &dyn MergebotApi,
    owner: &str,
    message: &str,
    notifier: &NotifierConfig,
) -> Result<()> {
    let mut users = vec![owner.to_string()];
    users.extend(notifier.fixed_recipients.iter().cloned());

    let recipients = resolve_recipients(api, users, &notifier.user_profile_field).await;
    debug!(notifier = %notifier.name, ?recipients, "notifying");
    api.notify_message(&notifier.plug, message, &recipients).await
}

/// De-duplicate users and, when a profile field is configured, map each one
/// to that field of their profile (keeping the user name when unresolvable)
pub async fn resolve_recipients(
    api: &dyn MergebotApi,
    users: Vec<String>,
    profile_field: &str,
) -> Vec<String> {
    let users = dedup(users);
    let path: Vec<&str> = profile_field.split('.').filter(|s| !s.is_empty()).collect();
    if path.is_empty() {
        return users;
    }

    let mut resolved = Vec::with_capacity(users.len());
    for user in users {
        let value = match api.get_user_profile(&user).await {
            Ok(profile) => profile_value(&profile, &path),
            Err(e) => {
                warn!("Unable to resolve user's profile for username '{user}': {e}");
                None
            }
        };
        resolved.push(value.unwrap_or(user));
    }
    dedup(resolved)
}

/// Follow a dot path into a user profile, returning a non-empty leaf
pub fn profile_value(profile: &Value, path: &[&str]) -> Option<String> {
    let leaf = path.iter().try_fold(profile, |node, key| node.get(*key))?;
    let value = match leaf {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!value.is_empty()).then_some(value)
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        if !unique.contains(&value) {
            unique.push(value);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_value_follows_path() {
        let profile = json!({"profile": {"email": "jo@example.com", "id": 7, "empty": ""}});
        assert_eq!(
            profile_value(&profile, &["profile", "email"]),
            Some("jo@example.com".to_string())
        );
        assert_eq!(profile_value(&profile, &["profile", "id"]), Some("7".to_string()));
        assert_eq!(profile_value(&profile, &["profile", "empty"]), None);
        assert_eq!(profile_value(&profile, &["profile", "missing"]), None);
        assert_eq!(profile_value(&profile, &["profile"]), None);
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let values = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(dedup(values), vec!["b".to_string(), "a".to_string()]);
    }
}
