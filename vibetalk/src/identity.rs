//! Local session identity and login profile validation.

use std::fmt;
use std::path::Path;

use uuid::Uuid;
use vibetalk_proto::data_uri;
use vibetalk_proto::message::PeerId;

/// Number of built-in avatar images.
pub const PRESET_AVATARS: u8 = 10;

/// Errors raised while validating a login profile.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    /// The display name is empty after trimming.
    #[error("display name must not be empty")]
    EmptyName,
    /// The preset number is outside `1..=10`.
    #[error("avatar preset {0} does not exist (expected 1-10)")]
    UnknownPreset(u32),
    /// The avatar string is neither a preset nor an image data URI.
    #[error("unrecognised avatar `{0}`")]
    InvalidAvatar(String),
    /// The photo file extension is not a known image type.
    #[error("unsupported photo type: {0}")]
    UnsupportedPhoto(String),
    /// The photo file could not be read.
    #[error("failed to read photo: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque token identifying this client session.
///
/// Generated once per client instance and never changed afterwards; other
/// users address this session by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh, time-ordered session identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The identifier as other peers see it.
    #[must_use]
    pub fn to_peer_id(&self) -> PeerId {
        PeerId::new(self.0.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Picture shown next to the user's messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Avatar {
    /// One of the built-in images, numbered from 1.
    Preset(u8),
    /// A custom photo as an image data URI.
    Custom(String),
}

impl Avatar {
    /// Select a built-in avatar.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::UnknownPreset`] outside `1..=10`.
    pub fn preset(number: u32) -> Result<Self, ProfileError> {
        u8::try_from(number)
            .ok()
            .filter(|n| (1..=PRESET_AVATARS).contains(n))
            .map(Self::Preset)
            .ok_or(ProfileError::UnknownPreset(number))
    }

    /// Parse an avatar setting: `3`, `avatar3.png`, or an image data URI.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] for unknown presets or other strings.
    pub fn parse(value: &str) -> Result<Self, ProfileError> {
        let value = value.trim();
        if value.starts_with("data:image/") {
            data_uri::decode(value)
                .map_err(|_| ProfileError::InvalidAvatar(value.to_string()))?;
            return Ok(Self::Custom(value.to_string()));
        }
        let number = value
            .strip_prefix("avatar")
            .and_then(|rest| rest.strip_suffix(".png"))
            .unwrap_or(value);
        number
            .parse::<u32>()
            .map_err(|_| ProfileError::InvalidAvatar(value.to_string()))
            .and_then(Self::preset)
    }

    /// Load a custom photo from disk and encode it as a data URI.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::UnsupportedPhoto`] for non-image extensions
    /// and [`ProfileError::Io`] if the file cannot be read.
    pub async fn from_photo_file(path: &Path) -> Result<Self, ProfileError> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        let mime = data_uri::mime_for_extension(ext)
            .filter(|mime| mime.starts_with("image/"))
            .ok_or_else(|| ProfileError::UnsupportedPhoto(path.display().to_string()))?;
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::Custom(data_uri::encode(mime, &bytes)))
    }

    /// The reference sent on the wire.
    #[must_use]
    pub fn as_ref_string(&self) -> String {
        match self {
            Self::Preset(n) => format!("avatar{n}.png"),
            Self::Custom(uri) => uri.clone(),
        }
    }
}

/// Display name and avatar chosen at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    display_name: String,
    avatar: Avatar,
}

impl Profile {
    /// Validate a login form.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::EmptyName`] if the name is blank.
    pub fn new(display_name: &str, avatar: Avatar) -> Result<Self, ProfileError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(ProfileError::EmptyName);
        }
        Ok(Self {
            display_name: display_name.to_string(),
            avatar,
        })
    }

    /// The trimmed display name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The chosen avatar.
    #[must_use]
    pub const fn avatar(&self) -> &Avatar {
        &self.avatar
    }
}

/// A logged-in session: immutable id plus profile.
#[derive(Debug, Clone)]
pub struct Identity {
    session_id: SessionId,
    peer_id: PeerId,
    profile: Profile,
    avatar_ref: String,
}

impl Identity {
    /// Create an identity with a freshly generated session id.
    #[must_use]
    pub fn new(profile: Profile) -> Self {
        Self::with_session_id(SessionId::new(), profile)
    }

    /// Create an identity for a known session id.
    #[must_use]
    pub fn with_session_id(session_id: SessionId, profile: Profile) -> Self {
        Self {
            peer_id: session_id.to_peer_id(),
            avatar_ref: profile.avatar.as_ref_string(),
            session_id,
            profile,
        }
    }

    /// The session identifier.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The session identifier in wire form.
    #[must_use]
    pub const fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// The login profile.
    #[must_use]
    pub const fn profile(&self) -> &Profile {
        &self.profile
    }

    /// The display name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.profile.display_name()
    }

    /// The avatar reference sent on the wire.
    #[must_use]
    pub fn avatar_ref(&self) -> &str {
        &self.avatar_ref
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_name_is_rejected() {
        assert!(matches!(
            Profile::new("   ", Avatar::Preset(1)),
            Err(ProfileError::EmptyName)
        ));
    }

    #[test]
    fn name_is_trimmed() {
        let profile = Profile::new("  Ana  ", Avatar::Preset(2)).unwrap();
        assert_eq!(profile.display_name(), "Ana");
    }

    #[test]
    fn preset_bounds() {
        assert!(Avatar::preset(1).is_ok());
        assert!(Avatar::preset(10).is_ok());
        assert!(matches!(Avatar::preset(0), Err(ProfileError::UnknownPreset(0))));
        assert!(matches!(Avatar::preset(11), Err(ProfileError::UnknownPreset(11))));
    }

    #[test]
    fn avatar_parse_forms() {
        assert_eq!(Avatar::parse("4").unwrap(), Avatar::Preset(4));
        assert_eq!(Avatar::parse("avatar10.png").unwrap(), Avatar::Preset(10));
        assert_eq!(
            Avatar::parse("data:image/png;base64,AA==").unwrap(),
            Avatar::Custom("data:image/png;base64,AA==".into())
        );
        assert!(Avatar::parse("smiley").is_err());
        assert!(Avatar::parse("data:image/png;base64,@@").is_err());
    }

    #[test]
    fn preset_ref_string() {
        assert_eq!(Avatar::Preset(7).as_ref_string(), "avatar7.png");
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn identity_exposes_wire_fields() {
        let id = SessionId::new();
        let identity =
            Identity::with_session_id(id.clone(), Profile::new("Ana", Avatar::Preset(3)).unwrap());
        assert_eq!(identity.peer_id().as_str(), id.to_string());
        assert_eq!(identity.avatar_ref(), "avatar3.png");
        assert_eq!(identity.display_name(), "Ana");
    }

    #[tokio::test]
    async fn photo_file_becomes_data_uri() {
        let path = std::env::temp_dir().join(format!("vibetalk-photo-{}.png", SessionId::new()));
        tokio::fs::write(&path, b"png").await.unwrap();
        let avatar = Avatar::from_photo_file(&path).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();
        assert_eq!(avatar, Avatar::Custom("data:image/png;base64,cG5n".into()));
    }

    #[tokio::test]
    async fn non_image_photo_is_rejected() {
        let err = Avatar::from_photo_file(Path::new("song.mp3")).await.unwrap_err();
        assert!(matches!(err, ProfileError::UnsupportedPhoto(_)));
    }
}
