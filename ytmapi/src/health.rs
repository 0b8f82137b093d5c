//! Audit de santé périodique de la connexion
//!
//! Toutes les 5 minutes : sans token, l'audit est un no-op ; un token qui
//! expire sous une heure purge proactivement la connexion (on force la
//! ré-authentification avant l'échec, pas après) ; sinon une requête d'état
//! légère sonde la liaison — un échec d'authentification purge, un échec
//! transitoire est seulement journalisé.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::interval;
use tracing::{debug, warn};

use crate::client::YtmClient;
use crate::descriptor::ConnectionDescriptor;

/// Période de l'audit
const AUDIT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Fenêtre d'expiration déclenchant la purge proactive
fn expiry_window() -> TimeDelta {
    TimeDelta::hours(1)
}

/// Décision prise par un tick d'audit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuditAction {
    /// Aucun token détenu
    Skip,
    /// Le token expire bientôt : purger avant l'échec
    ClearExpiring,
    /// Sonder la liaison avec une requête d'état
    ProbeState,
}

pub(crate) fn audit_action(
    descriptor: Option<&ConnectionDescriptor>,
    now: DateTime<Utc>,
) -> AuditAction {
    match descriptor {
        None => AuditAction::Skip,
        Some(d) if d.expires_within(now, expiry_window()) => AuditAction::ClearExpiring,
        Some(_) => AuditAction::ProbeState,
    }
}

impl YtmClient {
    /// Démarre la tâche d'audit de santé (remplace un audit déjà actif)
    ///
    /// La tâche est arrêtée par [`YtmClient::clear_connection`].
    pub fn spawn_health_audit(&self) {
        let client = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(AUDIT_INTERVAL);
            // Le premier tick d'un interval est immédiat ; l'audit ne doit
            // commencer qu'après une pleine période.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                run_audit_tick(&client).await;
            }
        });

        if let Some(previous) = self.inner.health.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }
}

/// Un tick d'audit. Doit rester un no-op si la connexion a été purgée
/// entre la planification et l'exécution.
pub(crate) async fn run_audit_tick(client: &YtmClient) {
    let action = audit_action(client.current_connection().as_ref(), Utc::now());
    match action {
        AuditAction::Skip => {}
        AuditAction::ClearExpiring => {
            warn!("Token expires soon, clearing connection for renewal");
            client.clear_connection();
        }
        AuditAction::ProbeState => match client.get_player_state().await {
            Ok(_) => debug!("Health audit passed"),
            Err(e) if e.is_auth_error() => {
                // get_player_state a déjà purgé sur 401/403 ; l'appel reste
                // idempotent pour les autres chemins d'erreur d'auth.
                warn!("Health audit failed on authentication: {e}");
                client.clear_connection();
            }
            Err(e) => warn!("Health audit failed (transient, ignored): {e}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorStore;

    fn descriptor(expiry: DateTime<Utc>) -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: "127.0.0.1".to_string(),
            port: 9863,
            token: "secret".to_string(),
            connected: true,
            token_expiry: expiry,
        }
    }

    #[test]
    fn audit_skips_without_token() {
        assert_eq!(audit_action(None, Utc::now()), AuditAction::Skip);
    }

    #[test]
    fn audit_clears_token_expiring_within_an_hour() {
        let now = Utc::now();
        let d = descriptor(now + TimeDelta::minutes(30));
        assert_eq!(audit_action(Some(&d), now), AuditAction::ClearExpiring);
    }

    #[test]
    fn audit_probes_with_a_fresh_token() {
        let now = Utc::now();
        let d = descriptor(now + TimeDelta::hours(23));
        assert_eq!(audit_action(Some(&d), now), AuditAction::ProbeState);
    }

    #[tokio::test]
    async fn audit_tick_clears_expiring_descriptor() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = DescriptorStore::new(dir.path().to_str().unwrap())?;
        let client = YtmClient::new(store)?;
        client.set_connection(descriptor(Utc::now() + TimeDelta::minutes(30)))?;

        run_audit_tick(&client).await;

        assert!(client.current_connection().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn audit_tick_is_a_noop_after_clear() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = DescriptorStore::new(dir.path().to_str().unwrap())?;
        let client = YtmClient::new(store)?;
        client.clear_connection();

        // Un timer qui se déclenche après la purge ne doit rien faire.
        run_audit_tick(&client).await;
        assert!(client.current_connection().is_none());
        Ok(())
    }
}
