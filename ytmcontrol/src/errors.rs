use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Une procédure de connexion est déjà en cours : les tentatives
    /// concurrentes sont rejetées plutôt que sérialisées
    #[error("a connection attempt is already in progress")]
    ConnectInProgress,
    #[error(transparent)]
    Api(#[from] ytmapi::YtmApiError),
}

impl StoreError {
    /// Vrai si l'erreur révèle un credential invalide
    pub fn is_auth_error(&self) -> bool {
        matches!(self, StoreError::Api(e) if e.is_auth_error())
    }
}
