//! Board serial numbers

use chrono::{Local, NaiveDate};

/// `strftime` format of the generated serial prefix - year, week of the year and three zeroes
pub const DEFAULT_SERIAL_DATE_FORMAT: &str = "%y%U000";

/// Where the serial number of the next board comes from
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SerialSource {
    /// Every board gets this exact serial
    Fixed(String),
    /// The operator completes the serial of each board, usually by scanning its label
    Prefix(String),
}

impl SerialSource {
    /// Decides where serials come from
    ///
    /// A serial given on the command line wins, and is used as the prefix in barcode scan mode.
    /// Otherwise the serial of the board description is used outside of barcode scan mode, and
    /// as a last resort a prefix is generated from `today`.
    pub fn resolve(
        cli_serial: Option<&str>,
        board_serial: Option<&str>,
        barcode_scan_mode: bool,
        today: NaiveDate,
    ) -> SerialSource {
        match (cli_serial, board_serial) {
            (Some(serial), _) if barcode_scan_mode => SerialSource::Prefix(serial.to_owned()),
            (Some(serial), _) => SerialSource::Fixed(serial.to_owned()),
            (None, Some(serial)) if !barcode_scan_mode => SerialSource::Fixed(serial.to_owned()),
            _ => SerialSource::Prefix(date_prefix(today)),
        }
    }
}

/// Generates the serial prefix for boards made on `date`
pub fn date_prefix(date: NaiveDate) -> String {
    date.format(DEFAULT_SERIAL_DATE_FORMAT).to_string()
}

/// Today's date in the local time zone
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Completes a serial from `prefix` and the operator entered `suffix`
///
/// Label serials are case insensitive and stored in upper case.
pub fn complete(prefix: &str, suffix: &str) -> String {
    format!("{}{}", prefix, suffix.trim().to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn it_should_format_date_prefix() {
        assert_eq!(date_prefix(date(2021, 10, 19)), "2142000");
        assert_eq!(date_prefix(date(2026, 1, 1)), "2600000");
        assert_eq!(date_prefix(date(2026, 1, 4)), "2601000");
    }

    #[test]
    fn it_should_complete_serial_in_upper_case() {
        assert_eq!(complete("2142000", "abc\r"), "2142000ABC");
        assert_eq!(complete("", " x1 "), "X1");
    }

    #[test]
    fn it_should_prefer_command_line_serial() {
        let today = date(2021, 10, 19);

        assert_eq!(
            SerialSource::resolve(Some("SN1"), Some("SN0"), false, today),
            SerialSource::Fixed("SN1".to_owned())
        );
        assert_eq!(
            SerialSource::resolve(Some("SN1"), Some("SN0"), true, today),
            SerialSource::Prefix("SN1".to_owned())
        );
    }

    #[test]
    fn it_should_fall_back_to_board_serial_then_date() {
        let today = date(2021, 10, 19);

        assert_eq!(
            SerialSource::resolve(None, Some("SN0"), false, today),
            SerialSource::Fixed("SN0".to_owned())
        );
        assert_eq!(
            SerialSource::resolve(None, Some("SN0"), true, today),
            SerialSource::Prefix("2142000".to_owned())
        );
        assert_eq!(
            SerialSource::resolve(None, None, false, today),
            SerialSource::Prefix("2142000".to_owned())
        );
    }
}
