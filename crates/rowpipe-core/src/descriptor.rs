//! Provider discovery: connection strings to reader/writer/transformer
//! instances.
//!
//! Each implementation registers one [`Descriptor`], a small tagged record
//! owning the provider's name, its option-set metadata, a connection-string
//! matcher, and a factory. The core never depends on a specific provider;
//! matching walks the descriptors in registration order and picks the first
//! whose `accepts` returns true.

use crate::error::{PipelineError, Result};
use crate::options::{OptionsInfo, OptionsRegistry};
use crate::reader::StreamReader;
use crate::transform::DataTransformer;
use crate::writer::{DataWriter, WriteStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Reader,
    Writer,
    Transformer,
}

/// Everything a factory needs to build an instance.
pub struct CreateContext<'a> {
    pub connection_string: &'a str,
    /// SQL text for providers with `requires_query`.
    pub query: Option<&'a str>,
    /// Write strategy; ignored by reader factories.
    pub strategy: WriteStrategy,
    /// Frozen options registry holding the provider option records.
    pub registry: &'a OptionsRegistry,
}

/// What a factory produces, tagged by descriptor kind.
pub enum Provider {
    Reader(Box<dyn StreamReader>),
    Writer(Box<dyn DataWriter>),
    Transformer(Box<dyn DataTransformer>),
}

impl Provider {
    fn kind_name(&self) -> &'static str {
        match self {
            Provider::Reader(_) => "reader",
            Provider::Writer(_) => "writer",
            Provider::Transformer(_) => "transformer",
        }
    }
}

/// Metadata record describing one reader or writer implementation.
pub struct Descriptor {
    pub kind: DescriptorKind,
    pub name: &'static str,
    /// Whether this provider needs a SQL text (most file adapters do not).
    pub requires_query: bool,
    /// Option-set metadata: prefix, display name, field schema.
    pub options: OptionsInfo,
    /// Connection-string matcher.
    pub accepts: fn(&str) -> bool,
    pub factory: fn(&CreateContext<'_>) -> Result<Provider>,
    /// Untyped bridge from `--<prefix>-<field>=<value>` flags to the typed
    /// option record (see [`crate::options::apply_option`]).
    pub apply_option: fn(&OptionsRegistry, &str, &str) -> Result<()>,
}

impl std::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Descriptor")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("requires_query", &self.requires_query)
            .finish()
    }
}

/// The ordered set of registered descriptors for one process.
#[derive(Debug, Default)]
pub struct DescriptorSet {
    descriptors: Vec<Descriptor>,
}

impl DescriptorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: Descriptor) {
        self.descriptors.push(descriptor);
    }

    pub fn extend(&mut self, descriptors: impl IntoIterator<Item = Descriptor>) {
        self.descriptors.extend(descriptors);
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// First descriptor of `kind` accepting the connection string, in
    /// registration order.
    pub fn find(&self, kind: DescriptorKind, connection_string: &str) -> Option<&Descriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.kind == kind)
            .find(|d| (d.accepts)(connection_string))
    }

    fn create(&self, kind: DescriptorKind, ctx: &CreateContext<'_>) -> Result<Provider> {
        let descriptor = self
            .find(kind, ctx.connection_string)
            .ok_or_else(|| PipelineError::provider_not_found(ctx.connection_string))?;
        if descriptor.requires_query && ctx.query.is_none() {
            return Err(PipelineError::config(format!(
                "provider {} requires a query",
                descriptor.name
            )));
        }
        (descriptor.factory)(ctx)
            .map_err(|e| PipelineError::provider_construction(descriptor.name, e))
    }

    pub fn create_reader(&self, ctx: &CreateContext<'_>) -> Result<Box<dyn StreamReader>> {
        match self.create(DescriptorKind::Reader, ctx)? {
            Provider::Reader(reader) => Ok(reader),
            other => Err(PipelineError::config(format!(
                "reader descriptor for `{}` produced a {}",
                ctx.connection_string,
                other.kind_name()
            ))),
        }
    }

    pub fn create_writer(&self, ctx: &CreateContext<'_>) -> Result<Box<dyn DataWriter>> {
        match self.create(DescriptorKind::Writer, ctx)? {
            Provider::Writer(writer) => Ok(writer),
            other => Err(PipelineError::config(format!(
                "writer descriptor for `{}` produced a {}",
                ctx.connection_string,
                other.kind_name()
            ))),
        }
    }

    /// Transformer descriptors match on the `kind:arguments` spec string
    /// instead of a connection string.
    pub fn create_transformer(&self, ctx: &CreateContext<'_>) -> Result<Box<dyn DataTransformer>> {
        match self.create(DescriptorKind::Transformer, ctx)? {
            Provider::Transformer(transformer) => Ok(transformer),
            other => Err(PipelineError::config(format!(
                "transformer descriptor for `{}` produced a {}",
                ctx.connection_string,
                other.kind_name()
            ))),
        }
    }
}
