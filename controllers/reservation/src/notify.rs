//! Reservation owner notifications
//!
//! After a pass changed the status of at least one site, the owner gets one
//! message summarising the reservation and every site.

use crate::error::ControllerError;
use booking_client::{BOOKING_TIME_FORMAT, Reservation, Status, UserData};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

const RESERVATION_TEMPLATE: &str = "Dear {{ first_name }},

Your PRAGMA Cloud reservation has been updated.  Please see details below.

Reservation:

ID:          {{ reservation_id }}
Title:       {{ title }}
Description: {{ description }}
Begin Time:  {{ begin }}
End Time:    {{ end }}
VC Image:    {{ image }}

Sites ({{ sites | length }}):
{% for site in sites %}
  Site: {{ site.name }}
    Status: {{ site.status }}
    CPUs:   {{ site.cpus }}
    Memory: {{ site.memory }}
    {{ site.notes }}
{% endfor %}";

/// Status change of one site during a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteChange {
    pub was: Status,
    pub now: Status,
}

/// A composed message for a reservation owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Serialize)]
struct SiteLine {
    name: String,
    status: String,
    cpus: String,
    memory: String,
    notes: String,
}

fn capitalize(name: &str) -> String {
    let lower = name.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn or_blank(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Compose the update message for `reservation`
///
/// # Arguments
/// * `reservation` - latest known snapshot of the reservation
/// * `user` - reservation owner
/// * `changes` - status changes of this pass, keyed by site id
pub fn compose(
    reservation: &Reservation,
    user: &UserData,
    changes: &HashMap<String, SiteChange>,
) -> Result<Notification, ControllerError> {
    let sites: Vec<SiteLine> = reservation
        .sites
        .iter()
        .map(|site| {
            let status = match changes.get(&site.site_id) {
                Some(change) => format!("{} (was {})", change.now, change.was),
                None => site.status.to_string(),
            };
            let notes = match site.admin_description.as_deref().map(str::trim) {
                Some(note) if !note.is_empty() && note != "None" => format!("Admin notes: {}", note),
                _ => String::new(),
            };
            SiteLine {
                name: site.site_name.clone(),
                status,
                cpus: or_blank(site.cpu),
                memory: or_blank(site.memory),
                notes,
            }
        })
        .collect();

    let mut ctx = tera::Context::new();
    ctx.insert("first_name", &capitalize(&user.firstname));
    ctx.insert("reservation_id", &reservation.reservation_id);
    ctx.insert("title", &reservation.title);
    ctx.insert("description", &reservation.description);
    ctx.insert("begin", &reservation.begin.format(BOOKING_TIME_FORMAT).to_string());
    ctx.insert("end", &reservation.end.format(BOOKING_TIME_FORMAT).to_string());
    ctx.insert("image", &reservation.image_type);
    ctx.insert("sites", &sites);

    let body = tera::Tera::one_off(RESERVATION_TEMPLATE, &ctx, false)
        .map_err(|e| ControllerError::Notification(format!("cannot render message: {}", e)))?;

    Ok(Notification {
        to: user.email_address.clone(),
        subject: format!(
            "Update: PRAGMA Cloud Scheduler reservation #{}",
            reservation.reservation_id
        ),
        body,
    })
}

/// Delivers notifications
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), ControllerError>;
}

/// Hands messages to the local MTA through `sendmail -t`
#[derive(Debug, Clone)]
pub struct SendmailNotifier {
    sendmail: PathBuf,
    from: String,
}

impl SendmailNotifier {
    pub fn new(sendmail: PathBuf, from: String) -> Self {
        Self { sendmail, from }
    }

    fn message(&self, notification: &Notification) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}",
            self.from, notification.to, notification.subject, notification.body
        )
    }
}

#[async_trait::async_trait]
impl Notifier for SendmailNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), ControllerError> {
        debug!("Sending '{}' to {}", notification.subject, notification.to);
        let mut child = Command::new(&self.sendmail)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ControllerError::Notification(format!(
                    "cannot run {}: {}",
                    self.sendmail.display(),
                    e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(self.message(notification).as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ControllerError::Notification(format!(
                "{} exited with {}: {}",
                self.sendmail.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        info!("Notified {} about reservation update", notification.to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn test_compose_marks_changed_sites() {
        let mut reservation = create_test_reservation(vec![
            create_test_site("1", Status::Starting),
            create_test_site("2", Status::Created),
        ]);
        reservation.sites[1].admin_description = Some("maintenance until noon".to_string());
        let mut changes = HashMap::new();
        changes.insert(
            "1".to_string(),
            SiteChange {
                was: Status::Created,
                now: Status::Starting,
            },
        );

        let n = compose(&reservation, &create_test_user(), &changes).unwrap();

        assert_eq!(n.to, "alice@example.org");
        assert_eq!(n.subject, "Update: PRAGMA Cloud Scheduler reservation #42");
        assert!(n.body.starts_with("Dear Alice,"));
        assert!(n.body.contains("Sites (2):"));
        assert!(n.body.contains("Status: starting (was created)"));
        assert!(n.body.contains("Status: created\n"));
        assert!(n.body.contains("Admin notes: maintenance until noon"));
        assert!(n.body.contains("Begin Time:  2016-05-01 10:00:00"));
    }

    #[test]
    fn test_compose_skips_placeholder_notes() {
        let mut reservation = create_test_reservation(vec![create_test_site("1", Status::Running)]);
        reservation.sites[0].admin_description = Some("None".to_string());
        let n = compose(&reservation, &create_test_user(), &HashMap::new()).unwrap();
        assert!(!n.body.contains("Admin notes"));
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("aLICE"), "Alice");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_sendmail_message_headers() {
        let notifier = SendmailNotifier::new(PathBuf::from("/usr/sbin/sendmail"), "root@sched".to_string());
        let message = notifier.message(&Notification {
            to: "alice@example.org".to_string(),
            subject: "Update".to_string(),
            body: "hello".to_string(),
        });
        assert!(message.starts_with("From: root@sched\nTo: alice@example.org\nSubject: Update\n"));
        assert!(message.ends_with("\n\nhello"));
    }
}
