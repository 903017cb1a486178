use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub is_guest: bool,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

impl Identity {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            is_guest: false,
            display_name: None,
            email: None,
            photo_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Loading,
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    pub identity: Option<Identity>,
    pub status: AuthStatus,
}

impl AuthState {
    /// The identity only when it may be used for remote reads and writes.
    pub fn online_identity(&self) -> Option<&Identity> {
        match self.status {
            AuthStatus::Online => self.identity.as_ref(),
            AuthStatus::Loading | AuthStatus::Offline => None,
        }
    }
}

pub trait AuthProvider: Send + Sync {
    fn state(&self) -> AuthState;
    fn login(&self) -> crate::error::Result<()>;
    fn logout(&self) -> crate::error::Result<()>;
}

/// Provider holding one configured identity that can be signed in and out.
pub struct LocalAuth {
    profile: Option<Identity>,
    state: RwLock<AuthState>,
}

impl LocalAuth {
    /// Starts signed in when a profile is configured, offline otherwise.
    pub fn new(profile: Option<Identity>) -> Self {
        let state = AuthState {
            identity: profile.clone(),
            status: if profile.is_some() {
                AuthStatus::Online
            } else {
                AuthStatus::Offline
            },
        };
        Self {
            profile,
            state: RwLock::new(state),
        }
    }

    /// A configured profile whose sign-in has not completed yet; stays
    /// `Loading` until [`AuthProvider::login`] runs.
    pub fn pending(profile: Option<Identity>) -> Self {
        Self {
            profile,
            state: RwLock::new(AuthState {
                identity: None,
                status: AuthStatus::Loading,
            }),
        }
    }

    /// Keep the identity but lose connectivity.
    #[cfg(test)]
    pub fn go_offline(&self) {
        self.write_state(|s| s.status = AuthStatus::Offline);
    }

    fn write_state(&self, f: impl FnOnce(&mut AuthState)) {
        let mut state = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state);
    }
}

impl AuthProvider for LocalAuth {
    fn state(&self) -> AuthState {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn login(&self) -> crate::error::Result<()> {
        let profile = self.profile.clone().ok_or_else(|| {
            crate::error::JournalError::Settings("no account configured; run `tradelog login --user <id>`".to_string())
        })?;
        self.write_state(|s| {
            s.identity = Some(profile);
            s.status = AuthStatus::Online;
        });
        Ok(())
    }

    fn logout(&self) -> crate::error::Result<()> {
        self.write_state(|s| {
            s.identity = None;
            s.status = AuthStatus::Offline;
        });
        Ok(())
    }
}
