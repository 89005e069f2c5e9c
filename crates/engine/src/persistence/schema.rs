use super::codec::{CodecError, RecordReader, RecordWriter};

/// Fields a store gained at one version, with how to write them, read them,
/// and what value they take for records saved before they existed.
pub struct FieldGroup<C> {
    pub introduced_in: i32,
    pub write: fn(&C, &mut RecordWriter),
    pub read: fn(&mut RecordReader<'_>, &mut C) -> Result<(), CodecError>,
    pub default: fn(&mut C),
}

/// Versioned record layout for one store.
///
/// `groups` is ordered newest first and is laid out in that order on disk.
/// A record stored at version N reads every group introduced at or before
/// N and takes the defaults of every later one. Adding a version means
/// prepending a group; existing groups are never edited.
pub struct Schema<C: 'static> {
    pub store: &'static str,
    pub groups: &'static [FieldGroup<C>],
}

impl<C: 'static> Schema<C> {
    pub fn current_version(&self) -> i32 {
        self.groups
            .first()
            .map_or(0, |group| group.introduced_in)
    }

    pub fn supports(&self, version: i32) -> bool {
        (0..=self.current_version()).contains(&version)
    }

    pub fn write(&self, context: &C, writer: &mut RecordWriter) {
        for group in self.groups {
            (group.write)(context, writer);
        }
    }

    pub fn read(&self, version: i32, reader: &mut RecordReader<'_>) -> Result<C, CodecError>
    where
        C: Default,
    {
        let mut context = C::default();
        for group in self.groups {
            if group.introduced_in <= version {
                (group.read)(reader, &mut context)?;
            } else {
                (group.default)(&mut context);
            }
        }
        Ok(context)
    }

    /// Writes a record the way a release at `version` would have. Used to
    /// produce historical fixtures.
    pub fn write_as(&self, version: i32, context: &C, writer: &mut RecordWriter) {
        for group in self
            .groups
            .iter()
            .filter(|group| group.introduced_in <= version)
        {
            (group.write)(context, writer);
        }
    }

    pub fn is_well_ordered(&self) -> bool {
        self.groups
            .windows(2)
            .all(|pair| pair[0].introduced_in > pair[1].introduced_in)
            && self
                .groups
                .last()
                .map_or(true, |oldest| oldest.introduced_in == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq, Eq)]
    struct Sample {
        base: i32,
        added: i32,
    }

    fn write_base(sample: &Sample, writer: &mut RecordWriter) {
        writer.write_i32(sample.base);
    }

    fn read_base(reader: &mut RecordReader<'_>, sample: &mut Sample) -> Result<(), CodecError> {
        sample.base = reader.read_i32()?;
        Ok(())
    }

    fn write_added(sample: &Sample, writer: &mut RecordWriter) {
        writer.write_i32(sample.added);
    }

    fn read_added(reader: &mut RecordReader<'_>, sample: &mut Sample) -> Result<(), CodecError> {
        sample.added = reader.read_i32()?;
        Ok(())
    }

    fn default_added(sample: &mut Sample) {
        sample.added = 42;
    }

    fn no_default(_: &mut Sample) {}

    const SAMPLE_SCHEMA: Schema<Sample> = Schema {
        store: "Sample",
        groups: &[
            FieldGroup {
                introduced_in: 1,
                write: write_added,
                read: read_added,
                default: default_added,
            },
            FieldGroup {
                introduced_in: 0,
                write: write_base,
                read: read_base,
                default: no_default,
            },
        ],
    };

    #[test]
    fn current_version_is_newest_group() {
        assert_eq!(SAMPLE_SCHEMA.current_version(), 1);
        assert!(SAMPLE_SCHEMA.supports(0));
        assert!(!SAMPLE_SCHEMA.supports(2));
        assert!(!SAMPLE_SCHEMA.supports(-1));
        assert!(SAMPLE_SCHEMA.is_well_ordered());
    }

    #[test]
    fn older_record_takes_defaults_for_newer_groups() {
        let original = Sample { base: 7, added: 9 };
        let mut writer = RecordWriter::new();
        SAMPLE_SCHEMA.write_as(0, &original, &mut writer);
        let bytes = writer.into_bytes();

        let mut reader = RecordReader::new(&bytes);
        let decoded = SAMPLE_SCHEMA.read(0, &mut reader).unwrap();
        assert_eq!(decoded, Sample { base: 7, added: 42 });
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn current_record_reads_every_group() {
        let original = Sample { base: 7, added: 9 };
        let mut writer = RecordWriter::new();
        SAMPLE_SCHEMA.write(&original, &mut writer);
        let bytes = writer.into_bytes();

        let decoded = SAMPLE_SCHEMA
            .read(1, &mut RecordReader::new(&bytes))
            .unwrap();
        assert_eq!(decoded, original);
    }
}
