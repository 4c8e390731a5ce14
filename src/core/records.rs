//! Purpose: Typed worklist records and their exact line encoding.
//! Exports: `Record`, `Pipetting`, `MAX_INSTRUMENT_VOLUME`.
//! Role: Serialization boundary for the instruction log; consumers rely on
//! the byte-exact field order of each record line.
//! Invariants: Volumes render with exactly two decimal digits.
//! Invariants: Text fields are at most 32 characters and semicolon-free.
use serde::Serialize;

use crate::core::error::{Error, ErrorKind};

/// Absolute volume ceiling accepted by the instrument, in microliters.
pub const MAX_INSTRUMENT_VOLUME: f64 = 7_158_278.0;

/// Field set shared by aspirate and dispense records.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Pipetting {
    pub rack_label: String,
    pub rack_id: String,
    pub rack_type: String,
    pub position: usize,
    pub tube_id: String,
    pub volume: f64,
    pub liquid_class: String,
    pub tip_mask: Option<u32>,
    pub forced_rack_type: String,
}

impl Pipetting {
    pub fn new(rack_label: impl Into<String>, position: usize, volume: f64) -> Result<Self, Error> {
        let rack_label = rack_label.into();
        check_field("rack_label", &rack_label)?;
        if rack_label.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("missing rack_label"));
        }
        if position == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("well positions are 1-based")
                .with_labware(rack_label));
        }
        if !volume.is_finite() || volume < 0.0 || volume > MAX_INSTRUMENT_VOLUME {
            return Err(Error::new(ErrorKind::InvalidVolume)
                .with_message(format!("invalid volume: {volume}"))
                .with_labware(rack_label)
                .with_volume(volume));
        }
        Ok(Self {
            rack_label,
            rack_id: String::new(),
            rack_type: String::new(),
            position,
            tube_id: String::new(),
            volume,
            liquid_class: String::new(),
            tip_mask: None,
            forced_rack_type: String::new(),
        })
    }

    pub fn with_liquid_class(mut self, liquid_class: impl Into<String>) -> Result<Self, Error> {
        self.liquid_class = liquid_class.into();
        check_field("liquid_class", &self.liquid_class)?;
        Ok(self)
    }

    pub fn with_tip_mask(mut self, tip_mask: Option<u32>) -> Self {
        self.tip_mask = tip_mask;
        self
    }

    pub fn with_rack_metadata(
        mut self,
        rack_id: impl Into<String>,
        tube_id: impl Into<String>,
        rack_type: impl Into<String>,
        forced_rack_type: impl Into<String>,
    ) -> Result<Self, Error> {
        self.rack_id = rack_id.into();
        self.tube_id = tube_id.into();
        self.rack_type = rack_type.into();
        self.forced_rack_type = forced_rack_type.into();
        check_field("rack_id", &self.rack_id)?;
        check_field("tube_id", &self.tube_id)?;
        check_field("rack_type", &self.rack_type)?;
        check_field("forced_rack_type", &self.forced_rack_type)?;
        Ok(self)
    }

    fn encode(&self, kind: char) -> String {
        let tip = self
            .tip_mask
            .map(|mask| mask.to_string())
            .unwrap_or_default();
        // the field between liquid class and tip mask (tip type) stays empty
        format!(
            "{kind};{};{};{};{};{};{:.2};{};;{tip};{}",
            self.rack_label,
            self.rack_id,
            self.rack_type,
            self.position,
            self.tube_id,
            self.volume,
            self.liquid_class,
            self.forced_rack_type,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Record {
    Aspirate(Pipetting),
    Dispense(Pipetting),
    Wash { scheme: u8 },
    Decontaminate,
    Flush,
    Break,
    SetDiti { index: u32 },
    Comment { text: String },
}

impl Record {
    pub fn wash(scheme: u8) -> Result<Self, Error> {
        if !(1..=4).contains(&scheme) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("wash scheme must be 1, 2, 3 or 4, not {scheme}")));
        }
        Ok(Record::Wash { scheme })
    }

    /// One line of worklist text, without a terminator.
    pub fn to_line(&self) -> String {
        match self {
            Record::Aspirate(fields) => fields.encode('A'),
            Record::Dispense(fields) => fields.encode('D'),
            Record::Wash { scheme } => format!("W{scheme};"),
            Record::Decontaminate => "WD;".to_string(),
            Record::Flush => "F;".to_string(),
            Record::Break => "B;".to_string(),
            Record::SetDiti { index } => format!("S;{index}"),
            Record::Comment { text } => format!("C;{text}"),
        }
    }

    pub fn is_break(&self) -> bool {
        matches!(self, Record::Break)
    }
}

fn check_field(field: &str, value: &str) -> Result<(), Error> {
    if value.len() > 32 || value.contains(';') {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("invalid {field}: {value}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Pipetting, Record, MAX_INSTRUMENT_VOLUME};
    use crate::core::error::ErrorKind;

    #[test]
    fn aspirate_line_matches_field_order() {
        let fields = Pipetting::new("plate", 1, 667.0).expect("fields");
        assert_eq!(Record::Aspirate(fields).to_line(), "A;plate;;;1;;667.00;;;;");
    }

    #[test]
    fn dispense_line_carries_class_and_mask() {
        let fields = Pipetting::new("plate", 15, 20.5)
            .expect("fields")
            .with_liquid_class("Water_FD")
            .expect("class")
            .with_tip_mask(Some(9));
        assert_eq!(
            Record::Dispense(fields).to_line(),
            "D;plate;;;15;;20.50;Water_FD;;9;"
        );
    }

    #[test]
    fn volumes_render_with_two_decimals() {
        let fields = Pipetting::new("t", 1, 100.0).expect("fields");
        assert_eq!(Record::Aspirate(fields).to_line(), "A;t;;;1;;100.00;;;;");
        let fields = Pipetting::new("t", 1, 2.346).expect("fields");
        assert!(Record::Aspirate(fields).to_line().contains(";2.35;"));
    }

    #[test]
    fn control_records_encode() {
        assert_eq!(Record::wash(1).expect("wash").to_line(), "W1;");
        assert_eq!(Record::wash(4).expect("wash").to_line(), "W4;");
        assert_eq!(Record::Decontaminate.to_line(), "WD;");
        assert_eq!(Record::Flush.to_line(), "F;");
        assert_eq!(Record::Break.to_line(), "B;");
        assert_eq!(Record::SetDiti { index: 2 }.to_line(), "S;2");
        assert_eq!(
            Record::Comment {
                text: "prepare".to_string()
            }
            .to_line(),
            "C;prepare"
        );
    }

    #[test]
    fn invalid_wash_scheme_is_rejected() {
        for bad in [0u8, 5, 9] {
            let err = Record::wash(bad).expect_err("should fail");
            assert_eq!(err.kind(), ErrorKind::Usage);
        }
    }

    #[test]
    fn invalid_volumes_are_rejected() {
        for bad in [-1.0, f64::NAN, f64::INFINITY, MAX_INSTRUMENT_VOLUME + 1.0] {
            let err = Pipetting::new("plate", 1, bad).expect_err("should fail");
            assert_eq!(err.kind(), ErrorKind::InvalidVolume);
        }
    }

    #[test]
    fn semicolons_in_fields_are_rejected() {
        let err = Pipetting::new("a;b", 1, 10.0).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = Pipetting::new("plate", 1, 10.0)
            .expect("fields")
            .with_liquid_class("evil;class")
            .expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn overlong_fields_are_rejected() {
        let long = "x".repeat(33);
        let err = Pipetting::new(long, 1, 10.0).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
