//! WebSocket extension framework (RFC 6455 Section 9).
//!
//! Extensions are registered once as prototypes in an [`ExtensionRegistry`],
//! which is shared between connections behind an `Arc`. The handshake asks
//! the registry to negotiate, and every accepted extension becomes a fresh,
//! parameterized instance owned by that connection's [`ExtensionPipeline`].
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wsengine::extensions::ExtensionRegistry;
//!
//! let mut registry = ExtensionRegistry::new();
//! registry.add(Box::new(MyExtension::default()))?;
//! let registry = Arc::new(registry);
//! // hand `registry.clone()` to every Connection
//! ```

use crate::error::{Error, Result};
use crate::protocol::Frame;
use std::fmt;

/// Represents a single extension parameter.
///
/// Extension parameters follow the format: `name; param1=value1; param2`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParam {
    /// Parameter name.
    pub name: String,
    /// Optional parameter value. None for boolean parameters.
    pub value: Option<String>,
}

impl ExtensionParam {
    /// Create a new parameter with a value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Create a boolean/flag parameter (no value).
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Parse a single parameter from a string (e.g., "param=value" or "param").
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if let Some((name, value)) = s.split_once('=') {
            Self {
                name: name.trim().to_string(),
                value: Some(value.trim().trim_matches('"').to_string()),
            }
        } else {
            Self::flag(s)
        }
    }
}

impl fmt::Display for ExtensionParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One entry of a `Sec-WebSocket-Extensions` header: a name plus parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    /// Extension name.
    pub name: String,
    /// Extension parameters.
    pub params: Vec<ExtensionParam>,
}

impl ExtensionOffer {
    /// Create a new extension offer with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Create a new extension offer with parameters.
    pub fn with_params(name: impl Into<String>, params: Vec<ExtensionParam>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Parse a single extension descriptor: `extension-name; param1=value1; param2`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if the extension name is empty.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(';');
        let name = parts
            .next()
            .ok_or_else(|| Error::InvalidExtension("Empty extension string".into()))?
            .trim()
            .to_string();

        if name.is_empty() {
            return Err(Error::InvalidExtension("Empty extension name".into()));
        }

        let params = parts
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(ExtensionParam::parse)
            .collect();

        Ok(Self { name, params })
    }

    /// Parse a comma-separated `Sec-WebSocket-Extensions` header value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if any descriptor is invalid.
    pub fn parse_header(header: &str) -> Result<Vec<Self>> {
        header
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| Self::parse(s.trim()))
            .collect()
    }

    /// Get a parameter by name.
    pub fn get_param(&self, name: &str) -> Option<&ExtensionParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Check if a parameter is present.
    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }
}

impl fmt::Display for ExtensionOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for param in &self.params {
            write!(f, "; {}", param)?;
        }
        Ok(())
    }
}

/// Join descriptors into one header value.
pub fn format_header(offers: &[ExtensionOffer]) -> String {
    offers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// RSV bit usage declaration for extensions.
///
/// Extensions must declare which RSV bits they use to prevent conflicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RsvBits {
    /// Extension uses RSV1.
    pub rsv1: bool,
    /// Extension uses RSV2.
    pub rsv2: bool,
    /// Extension uses RSV3.
    pub rsv3: bool,
}

impl RsvBits {
    /// No RSV bits used.
    pub const NONE: Self = Self {
        rsv1: false,
        rsv2: false,
        rsv3: false,
    };

    /// RSV1 only.
    pub const RSV1: Self = Self {
        rsv1: true,
        rsv2: false,
        rsv3: false,
    };

    /// Check if any bits conflict with another declaration.
    pub fn conflicts_with(&self, other: &RsvBits) -> bool {
        (self.rsv1 && other.rsv1) || (self.rsv2 && other.rsv2) || (self.rsv3 && other.rsv3)
    }

    fn merge(&mut self, other: RsvBits) {
        self.rsv1 |= other.rsv1;
        self.rsv2 |= other.rsv2;
        self.rsv3 |= other.rsv3;
    }
}

/// A negotiated payload transform.
///
/// The same trait describes both roles an extension plays: the prototype
/// kept in the registry, which only answers [`negotiate`](Self::negotiate),
/// and the per-connection instance it returns, which transforms payloads.
///
/// # Example Implementation
///
/// ```rust,ignore
/// #[derive(Debug, Default)]
/// struct Reverse;
///
/// impl Extension for Reverse {
///     fn name(&self) -> &str { "x-reverse" }
///
///     fn negotiate(&self, _params: &[ExtensionParam]) -> Result<Option<Box<dyn Extension>>> {
///         Ok(Some(Box::new(Reverse)))
///     }
///
///     fn prepare(&mut self, _frame: &mut Frame, mut data: Vec<u8>) -> Result<Vec<u8>> {
///         data.reverse();
///         Ok(data)
///     }
///
///     fn restore(&mut self, _frame: &mut Frame, mut data: Vec<u8>) -> Result<Vec<u8>> {
///         data.reverse();
///         Ok(data)
///     }
/// }
/// ```
pub trait Extension: Send + Sync + fmt::Debug {
    /// Token used in the `Sec-WebSocket-Extensions` header.
    fn name(&self) -> &str;

    /// Returns which RSV bits this extension uses.
    fn rsv_bits(&self) -> RsvBits {
        RsvBits::NONE
    }

    /// Parameters a client offers in its upgrade request.
    fn offer_params(&self) -> Vec<ExtensionParam> {
        Vec::new()
    }

    /// Create a per-connection instance from the peer's parameters.
    ///
    /// Returns `Ok(None)` to decline the offer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if the parameters are malformed.
    fn negotiate(&self, params: &[ExtensionParam]) -> Result<Option<Box<dyn Extension>>>;

    /// Create a client-side instance from the parameters the server accepted.
    ///
    /// Defaults to [`negotiate`](Self::negotiate), treating a decline as an
    /// error since the server already committed to the extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if the accepted parameters are unusable.
    fn configure(&self, params: &[ExtensionParam]) -> Result<Box<dyn Extension>> {
        self.negotiate(params)?.ok_or_else(|| {
            Error::InvalidExtension(format!(
                "'{}' rejected the parameters accepted by the server",
                self.name()
            ))
        })
    }

    /// Parameters of a negotiated instance, echoed in the server response.
    fn params(&self) -> Vec<ExtensionParam> {
        Vec::new()
    }

    /// Transform an outgoing payload. May also set RSV bits on `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] if the transform fails.
    fn prepare(&mut self, frame: &mut Frame, data: Vec<u8>) -> Result<Vec<u8>>;

    /// Undo [`prepare`](Self::prepare) on an incoming payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] if the transform fails.
    fn restore(&mut self, frame: &mut Frame, data: Vec<u8>) -> Result<Vec<u8>>;

    /// Offered frames with opcodes RFC 6455 leaves unassigned.
    ///
    /// Return `Ok(true)` to claim the frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] if a claimed frame cannot be handled.
    fn handle_extension_frame(&mut self, _frame: &Frame) -> Result<bool> {
        Ok(false)
    }
}

/// Prototypes of the extensions an endpoint supports.
///
/// Built once, then shared read-only between connections.
#[derive(Default)]
pub struct ExtensionRegistry {
    prototypes: Vec<Box<dyn Extension>>,
    used_rsv_bits: RsvBits,
}

impl ExtensionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prototype.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if the name is already registered
    /// or the RSV bits conflict with registered extensions.
    pub fn add(&mut self, extension: Box<dyn Extension>) -> Result<()> {
        if self.get(extension.name()).is_some() {
            return Err(Error::InvalidExtension(format!(
                "Extension '{}' is already registered",
                extension.name()
            )));
        }

        let rsv = extension.rsv_bits();
        if self.used_rsv_bits.conflicts_with(&rsv) {
            return Err(Error::InvalidExtension(format!(
                "Extension '{}' RSV bits conflict with existing extensions",
                extension.name()
            )));
        }

        self.used_rsv_bits.merge(rsv);
        self.prototypes.push(extension);
        Ok(())
    }

    /// Number of registered prototypes.
    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    /// Look up a prototype by name.
    pub fn get(&self, name: &str) -> Option<&dyn Extension> {
        self.prototypes
            .iter()
            .find(|e| e.name() == name)
            .map(AsRef::as_ref)
    }

    /// Descriptors a client offers, in registration order.
    pub fn offers(&self) -> Vec<ExtensionOffer> {
        self.prototypes
            .iter()
            .map(|ext| ExtensionOffer::with_params(ext.name(), ext.offer_params()))
            .collect()
    }

    /// Server side: negotiate the client's offers.
    ///
    /// Offers are visited in the client's order. Unknown, declined and
    /// repeated names are skipped. Returns the pipeline of new instances and
    /// the descriptors to echo in the response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if a prototype rejects malformed
    /// parameters.
    pub fn negotiate(
        &self,
        offers: &[ExtensionOffer],
    ) -> Result<(ExtensionPipeline, Vec<ExtensionOffer>)> {
        let mut pipeline = ExtensionPipeline::new();
        let mut accepted: Vec<ExtensionOffer> = Vec::new();

        for offer in offers {
            if accepted.iter().any(|a| a.name == offer.name) {
                continue;
            }
            let Some(prototype) = self.get(&offer.name) else {
                tracing::trace!(extension = %offer.name, "ignoring unsupported extension");
                continue;
            };
            match prototype.negotiate(&offer.params)? {
                Some(instance) => {
                    accepted.push(ExtensionOffer::with_params(
                        offer.name.clone(),
                        instance.params(),
                    ));
                    pipeline.push(instance);
                }
                None => {
                    tracing::debug!(extension = %offer.name, "extension declined offer");
                }
            }
        }

        Ok((pipeline, accepted))
    }

    /// Client side: instantiate the extensions the server accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if a response names an unknown
    /// extension or an instance cannot be configured.
    pub fn configure(&self, responses: &[ExtensionOffer]) -> Result<ExtensionPipeline> {
        let mut pipeline = ExtensionPipeline::new();
        for response in responses {
            let prototype = self.get(&response.name).ok_or_else(|| {
                Error::InvalidExtension(format!("Unknown extension '{}'", response.name))
            })?;
            pipeline.push(prototype.configure(&response.params)?);
        }
        Ok(pipeline)
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field(
                "extensions",
                &self.prototypes.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .field("used_rsv_bits", &self.used_rsv_bits)
            .finish()
    }
}

/// The negotiated extension instances of one connection, in order.
#[derive(Debug, Default)]
pub struct ExtensionPipeline {
    extensions: Vec<Box<dyn Extension>>,
}

impl ExtensionPipeline {
    /// An empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a negotiated instance.
    pub fn push(&mut self, extension: Box<dyn Extension>) {
        self.extensions.push(extension);
    }

    /// Number of negotiated extensions.
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Check if nothing was negotiated.
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Names of the negotiated extensions, in order.
    pub fn names(&self) -> Vec<String> {
        self.extensions.iter().map(|e| e.name().to_string()).collect()
    }

    /// Run `prepare` of every extension in negotiation order.
    ///
    /// # Errors
    ///
    /// Propagates the first extension failure.
    pub fn prepare(&mut self, frame: &mut Frame, data: Vec<u8>) -> Result<Vec<u8>> {
        self.extensions
            .iter_mut()
            .try_fold(data, |data, ext| ext.prepare(frame, data))
    }

    /// Run `restore` of every extension, also in negotiation order.
    ///
    /// # Errors
    ///
    /// Propagates the first extension failure.
    pub fn restore(&mut self, frame: &mut Frame, data: Vec<u8>) -> Result<Vec<u8>> {
        self.extensions
            .iter_mut()
            .try_fold(data, |data, ext| ext.restore(frame, data))
    }

    /// Offer a frame with an unassigned opcode to each extension until one
    /// claims it.
    ///
    /// # Errors
    ///
    /// Propagates a failure of the claiming extension.
    pub fn handle_extension_frame(&mut self, frame: &Frame) -> Result<bool> {
        for ext in &mut self.extensions {
            if ext.handle_extension_frame(frame)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
