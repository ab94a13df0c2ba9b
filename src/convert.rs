//! Conversion driver.
//!
//! ```text
//! start_file(schema)
//! while source.has_next():
//!     start_entry()
//!     for (name, tag) in schema:  registry[tag].transcode(name, source, destination)
//!     finish_entry()
//! finish_file()
//! ```
//!
//! Packing and unpacking differ only in which configured side is the source.
//! Any error aborts the run at once; `finish_file` is then never called.

use thiserror::Error;
use tracing::{debug, info};

use crate::channel::{create_writer, open_reader, ChannelError, Reader, Writer};
use crate::config::{ConfigError, Direction, Job};
use crate::registry::{Registry, Transcode};
use crate::schema::{Schema, TypeTag};

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("No operation registered for type tag {0}")]
    Unregistered(TypeTag),
    #[error("Entry {entry}, field '{field}'")]
    Field {
        entry:  u64,
        field:  String,
        #[source]
        source: ChannelError,
    },
}

/// Stream every entry of `src` into `dst`.  Returns the number of entries
/// converted.
pub fn convert(
    schema:   &Schema,
    registry: &Registry,
    src:      &mut dyn Reader,
    dst:      &mut dyn Writer,
) -> Result<u64, ConvertError> {
    // Resolve every tag before the first byte is written.
    let plan: Vec<(&str, &dyn Transcode)> = schema
        .fields()
        .iter()
        .map(|field| {
            registry
                .get(field.tag)
                .map(|op| (field.name.as_str(), op))
                .ok_or(ConvertError::Unregistered(field.tag))
        })
        .collect::<Result<_, _>>()?;

    dst.start_file(schema)?;

    let mut entries = 0u64;
    while src.has_next()? {
        dst.start_entry()?;
        for &(name, op) in &plan {
            op.transcode(name, src, dst).map_err(|source| ConvertError::Field {
                entry: entries,
                field: name.to_owned(),
                source,
            })?;
        }
        dst.finish_entry()?;
        entries += 1;
    }

    dst.finish_file()?;
    debug!(entries, "finished file");
    Ok(entries)
}

/// Open both sides of `job` for `direction` and convert.
pub fn run(job: &Job, registry: &Registry, direction: Direction) -> Result<u64, ConvertError> {
    job.validate()?;
    let (source, destination) = job.endpoints(direction);
    info!(
        ?direction,
        from = %source.path.display(),
        to   = %destination.path.display(),
        fields = job.schema.len(),
        "converting {} -> {}",
        source.format.name(),
        destination.format.name(),
    );

    let mut src = open_reader(source)?;
    let mut dst = create_writer(destination)?;
    let entries = convert(&job.schema, registry, &mut *src, &mut *dst)?;

    info!(entries, "conversion complete");
    Ok(entries)
}
