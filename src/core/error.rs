use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Usage,
    ShapeMismatch,
    InvalidVolume,
    VolumeOverflow,
    VolumeUnderflow,
    InvalidTip,
    UnknownPartitionMode,
    SessionClosed,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    labware: Option<String>,
    well: Option<String>,
    volume: Option<f64>,
    label: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            labware: None,
            well: None,
            volume: None,
            label: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_labware(mut self, labware: impl Into<String>) -> Self {
        self.labware = Some(labware.into());
        self
    }

    pub fn with_well(mut self, well: impl Into<String>) -> Self {
        self.well = Some(well.into());
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(labware) = &self.labware {
            write!(f, " (labware: {labware})")?;
        }
        if let Some(well) = &self.well {
            write!(f, " (well: {well})")?;
        }
        if let Some(volume) = self.volume {
            write!(f, " (volume: {volume})")?;
        }
        if let Some(label) = &self.label {
            write!(f, " (step: {label})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Usage => 2,
        ErrorKind::ShapeMismatch => 3,
        ErrorKind::InvalidVolume => 4,
        ErrorKind::VolumeOverflow => 5,
        ErrorKind::VolumeUnderflow => 6,
        ErrorKind::InvalidTip => 7,
        ErrorKind::UnknownPartitionMode => 8,
        ErrorKind::SessionClosed => 9,
        ErrorKind::Io => 10,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Usage, 2),
            (ErrorKind::ShapeMismatch, 3),
            (ErrorKind::InvalidVolume, 4),
            (ErrorKind::VolumeOverflow, 5),
            (ErrorKind::VolumeUnderflow, 6),
            (ErrorKind::InvalidTip, 7),
            (ErrorKind::UnknownPartitionMode, 8),
            (ErrorKind::SessionClosed, 9),
            (ErrorKind::Io, 10),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::VolumeUnderflow)
            .with_message("too little volume: 50 - 45 < 10")
            .with_labware("plate")
            .with_well("A01")
            .with_label("dilute");
        let text = err.to_string();
        assert!(text.contains("VolumeUnderflow"));
        assert!(text.contains("plate"));
        assert!(text.contains("A01"));
        assert!(text.contains("dilute"));
    }
}
