//! Fleetdash operator session and auth gate.
//!
//! The gate owns the session context explicitly: it is created when the gate
//! mounts and dropped on sign-out. Callers borrow it for every backend call.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::Context;
use fleetdash_client_server_lib::auth::{parse_refresh_token, RefreshToken};
use fleetdash_server_backbone::routes::{PUBLIC_ROUTES, SIGN_IN_ROUTE};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;

pub const TOKEN_FILE: &str = "refresh_token";

// Cosmetic pause so the loading indicator does not flash.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(250);

/// An established identity-provider session.
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    refresh_token: RefreshToken,
    established_at: SystemTime,
}

impl Session {
    pub fn new(refresh_token: RefreshToken) -> Self {
        Self {
            refresh_token,
            established_at: SystemTime::now(),
        }
    }

    pub fn refresh_token(&self) -> &RefreshToken {
        &self.refresh_token
    }

    pub fn established_at(&self) -> SystemTime {
        self.established_at
    }
}

/// Source of truth for whether the operator is signed in.
pub trait IdentityProvider {
    /// `Ok(None)` means no session exists; `Err` means the check itself failed.
    fn check_session(&self) -> impl Future<Output = anyhow::Result<Option<Session>>> + Send;

    /// Start the provider's sign-in flow. The outcome is observed by the
    /// next `check_session`.
    fn begin_sign_in(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn sign_out(&self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Clone, Debug)]
pub enum GateState {
    Initializing,
    Authenticated(Session),
    Unauthenticated,
    Errored(String),
}

/// What the protected surface should show for a route.
#[derive(Debug, PartialEq)]
pub enum GateView<'a> {
    Loading,
    Error {
        message: &'a str,
        sign_in_route: &'a str,
    },
    /// Render the protected content. Public routes render without a session.
    Content(Option<&'a Session>),
    Redirect(&'a str),
    Blank,
}

#[derive(Clone, Debug)]
pub struct GateConfig {
    pub public_routes: Vec<String>,
    pub sign_in_route: String,
    pub settle_delay: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            public_routes: PUBLIC_ROUTES.iter().map(|r| r.to_string()).collect(),
            sign_in_route: SIGN_IN_ROUTE.to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

pub struct AuthGate<P> {
    provider: P,
    config: GateConfig,
    state: GateState,
    redirected: bool,
}

impl<P: IdentityProvider> AuthGate<P> {
    pub fn new(provider: P, config: GateConfig) -> Self {
        Self {
            provider,
            config,
            state: GateState::Initializing,
            redirected: false,
        }
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.state {
            GateState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run the provider's session check once. Only `Initializing` moves; a
    /// settled gate stays where it is until the user signs in or out.
    pub async fn mount(&mut self) -> &GateState {
        if !matches!(self.state, GateState::Initializing) {
            return &self.state;
        }

        tokio::time::sleep(self.config.settle_delay).await;

        self.state = match self.provider.check_session().await {
            Ok(Some(session)) => {
                log::debug!("Session established");
                GateState::Authenticated(session)
            }
            Ok(None) => {
                log::debug!("No session");
                GateState::Unauthenticated
            }
            Err(e) => {
                log::warn!("Session check failed: {e:#}");
                GateState::Errored(format!("{e:#}"))
            }
        };
        &self.state
    }

    pub fn is_public(&self, route: &str) -> bool {
        let path = route.split(['?', '#']).next().unwrap_or(route);
        self.config.public_routes.iter().any(|r| r == path)
    }

    pub fn view(&mut self, route: &str) -> GateView<'_> {
        let public = self.is_public(route);
        match &self.state {
            GateState::Initializing => GateView::Loading,
            GateState::Errored(message) => GateView::Error {
                message,
                sign_in_route: &self.config.sign_in_route,
            },
            GateState::Authenticated(session) => GateView::Content(Some(session)),
            GateState::Unauthenticated if public => GateView::Content(None),
            GateState::Unauthenticated => {
                if self.redirected {
                    GateView::Blank
                } else {
                    self.redirected = true;
                    GateView::Redirect(&self.config.sign_in_route)
                }
            }
        }
    }

    /// Manual retry from the error view or sign-in page: re-initiate sign-in
    /// through the provider, then check the session again.
    pub async fn sign_in(&mut self) -> &GateState {
        self.redirected = false;
        if let Err(e) = self.provider.begin_sign_in().await {
            log::warn!("Sign-in could not start: {e:#}");
            self.state = GateState::Errored(format!("{e:#}"));
            return &self.state;
        }
        self.state = GateState::Initializing;
        self.mount().await
    }

    /// Tear down the session context.
    pub async fn sign_out(&mut self) -> anyhow::Result<()> {
        self.provider.sign_out().await?;
        self.state = GateState::Unauthenticated;
        self.redirected = false;
        Ok(())
    }
}

/// Identity provider backed by a refresh token saved in a state directory.
pub struct StoredTokenProvider {
    state_dir: PathBuf,
}

impl StoredTokenProvider {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn token_path(&self) -> PathBuf {
        self.state_dir.join(TOKEN_FILE)
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Save a token obtained from the identity provider's sign-in flow.
    pub async fn store_token(&self, token: &RefreshToken) -> io::Result<()> {
        fs::create_dir_all(&self.state_dir).await?;

        // Temp file then rename, so a concurrent check never sees half a token.
        let tmp_path = self.state_dir.join(format!("{}_tmp", TOKEN_FILE));
        fs::write(&tmp_path, token.as_str()).await?;
        restrict_permissions(&tmp_path).await?;
        fs::rename(&tmp_path, self.token_path()).await
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

impl IdentityProvider for StoredTokenProvider {
    async fn check_session(&self) -> anyhow::Result<Option<Session>> {
        let path = self.token_path();
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        let token = parse_refresh_token(contents)
            .with_context(|| format!("Stored token in {} is unusable", path.display()))?;
        Ok(Some(Session::new(token)))
    }

    /// Tokens arrive out of band (`store_token`); make sure they have a home.
    async fn begin_sign_in(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.state_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.state_dir.display()))
    }

    async fn sign_out(&self) -> anyhow::Result<()> {
        match fs::remove_file(self.token_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove stored token"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers session checks from a script, one entry per check.
    #[derive(Default)]
    struct ScriptedProvider {
        answers: Mutex<VecDeque<Result<Option<&'static str>, &'static str>>>,
        checks: AtomicUsize,
        sign_ins: AtomicUsize,
        sign_outs: AtomicUsize,
        refuse_sign_in: bool,
    }

    impl ScriptedProvider {
        fn with(answers: Vec<Result<Option<&'static str>, &'static str>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                ..Self::default()
            }
        }
    }

    impl IdentityProvider for ScriptedProvider {
        async fn check_session(&self) -> anyhow::Result<Option<Session>> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            let answer = self.answers.lock().unwrap().pop_front().unwrap_or(Ok(None));
            match answer {
                Ok(Some(token)) => Ok(Some(Session::new(RefreshToken::new(token)?))),
                Ok(None) => Ok(None),
                Err(msg) => Err(anyhow::anyhow!(msg)),
            }
        }

        async fn begin_sign_in(&self) -> anyhow::Result<()> {
            self.sign_ins.fetch_add(1, Ordering::SeqCst);
            if self.refuse_sign_in {
                anyhow::bail!("provider unreachable");
            }
            Ok(())
        }

        async fn sign_out(&self) -> anyhow::Result<()> {
            self.sign_outs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn gate(answers: Vec<Result<Option<&'static str>, &'static str>>) -> AuthGate<ScriptedProvider> {
        let config = GateConfig {
            settle_delay: Duration::ZERO,
            ..GateConfig::default()
        };
        AuthGate::new(ScriptedProvider::with(answers), config)
    }

    #[tokio::test]
    async fn loading_until_mounted() {
        let mut gate = gate(vec![Ok(Some("tok"))]);
        assert_eq!(gate.view("/dashboard"), GateView::Loading);
        assert_eq!(gate.view(SIGN_IN_ROUTE), GateView::Loading);

        gate.mount().await;
        let session = gate.session().cloned();
        assert!(session.is_some());
        assert_eq!(gate.view("/dashboard"), GateView::Content(session.as_ref()));
    }

    #[tokio::test]
    async fn unauthenticated_redirects_once() {
        let mut gate = gate(vec![Ok(None)]);
        gate.mount().await;

        assert_eq!(gate.view("/map"), GateView::Redirect(SIGN_IN_ROUTE));
        assert_eq!(gate.view("/map"), GateView::Blank);
        assert_eq!(gate.view("/sign-in?next=/map"), GateView::Content(None));
        assert_eq!(gate.view("/auth/callback"), GateView::Content(None));
    }

    #[tokio::test]
    async fn failed_check_is_terminal_until_retry() {
        let mut gate = gate(vec![Err("provider offline"), Ok(Some("tok"))]);
        gate.mount().await;

        assert_eq!(
            gate.view("/map"),
            GateView::Error {
                message: "provider offline",
                sign_in_route: SIGN_IN_ROUTE
            }
        );

        // Mounting again does not re-check.
        gate.mount().await;
        assert!(matches!(gate.state(), GateState::Errored(_)));
        assert_eq!(gate.provider().checks.load(Ordering::SeqCst), 1);

        gate.sign_in().await;
        assert!(matches!(gate.state(), GateState::Authenticated(_)));
        assert_eq!(gate.provider().sign_ins.load(Ordering::SeqCst), 1);
        assert_eq!(gate.provider().checks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sign_in_that_cannot_start_is_an_error() {
        let provider = ScriptedProvider {
            refuse_sign_in: true,
            ..ScriptedProvider::with(vec![Ok(None), Ok(Some("tok"))])
        };
        let config = GateConfig {
            settle_delay: Duration::ZERO,
            ..GateConfig::default()
        };
        let mut gate = AuthGate::new(provider, config);
        gate.mount().await;

        gate.sign_in().await;
        assert_eq!(
            gate.view("/map"),
            GateView::Error {
                message: "provider unreachable",
                sign_in_route: SIGN_IN_ROUTE
            }
        );
        assert_eq!(gate.provider().checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sign_in_starts_a_fresh_session() {
        let mut gate = gate(vec![Ok(Some("tok")), Ok(Some("tok"))]);
        gate.mount().await;
        let first = gate.session().unwrap().established_at();

        std::thread::sleep(Duration::from_millis(5));
        gate.sign_in().await;

        let second = gate.session().unwrap().established_at();
        assert!(second > first);
    }

    #[tokio::test]
    async fn sign_out_drops_the_session() {
        let mut gate = gate(vec![Ok(Some("tok"))]);
        gate.mount().await;
        assert!(gate.session().is_some());

        gate.sign_out().await.unwrap();
        assert!(gate.session().is_none());
        assert_eq!(gate.provider().sign_outs.load(Ordering::SeqCst), 1);
        assert_eq!(gate.view("/map"), GateView::Redirect(SIGN_IN_ROUTE));
    }

    #[tokio::test(start_paused = true)]
    async fn settle_delay_is_applied() {
        let mut gate = AuthGate::new(ScriptedProvider::with(vec![Ok(None)]), GateConfig::default());
        let started = tokio::time::Instant::now();
        gate.mount().await;
        assert!(started.elapsed() >= DEFAULT_SETTLE_DELAY);
    }

    #[tokio::test]
    async fn stored_token_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let provider = StoredTokenProvider::new(dir.path().join("state"));

        assert!(provider.check_session().await.unwrap().is_none());

        provider
            .store_token(&RefreshToken::new("rt-123").unwrap())
            .await
            .unwrap();
        let session = provider.check_session().await.unwrap().unwrap();
        assert_eq!(session.refresh_token().as_str(), "rt-123");

        provider.sign_out().await.unwrap();
        assert!(provider.check_session().await.unwrap().is_none());
        // Signing out twice is fine.
        provider.sign_out().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_token_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TOKEN_FILE), "   ").unwrap();
        let provider = StoredTokenProvider::new(dir.path());

        let mut gate = AuthGate::new(
            provider,
            GateConfig {
                settle_delay: Duration::ZERO,
                ..GateConfig::default()
            },
        );
        gate.mount().await;
        assert!(matches!(gate.state(), GateState::Errored(_)));
    }
}
