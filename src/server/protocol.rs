//! Wire protocol: one UTF-8 text request per connection, one status line back.
//!
//! ```text
//! PING                    -> PONG
//! INPUT|OUTPUT|SCALE      -> SUCCESS | ERROR: <description>
//! ```

use std::path::PathBuf;

use crate::error::{ServiceError, ServiceResult};
use crate::processing::{Outcome, TransformRequest};

pub const PING: &str = "PING";
pub const PONG: &str = "PONG";
pub const SUCCESS: &str = "SUCCESS";

/// Upper bound on a single request read.
pub const MAX_REQUEST_BYTES: usize = 4096;

const FIELD_SEPARATOR: char = '|';

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping,
    Upscale(TransformRequest),
}

/// Parse one request. Surrounding whitespace (including a trailing newline) is ignored.
pub fn parse_request(line: &str) -> ServiceResult<Command> {
    let line = line.trim();
    if line == PING {
        return Ok(Command::Ping);
    }

    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
    let [input, output, scale] = fields.as_slice() else {
        return Err(ServiceError::protocol("Invalid format. Expected INPUT|OUTPUT|SCALE")
            .with_metadata("fields", fields.len().to_string()));
    };

    let scale: f64 = scale.trim().parse()?;
    if !scale.is_finite() || scale <= 0.0 {
        return Err(ServiceError::protocol(format!(
            "Invalid scale: {} (must be a positive number)",
            scale
        )));
    }

    Ok(Command::Upscale(TransformRequest {
        input: PathBuf::from(input.trim()),
        output: PathBuf::from(output.trim()),
        scale,
    }))
}

/// Status line for a finished job.
pub fn reply_for(result: &ServiceResult<Outcome>) -> String {
    match result {
        Ok(_) => SUCCESS.to_string(),
        Err(e) => error_reply(e),
    }
}

pub fn error_reply(error: &ServiceError) -> String {
    format!("ERROR: {}", error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tile_scale::plan::Size;

    #[test]
    fn ping_tolerates_newline() {
        assert_eq!(parse_request("PING").unwrap(), Command::Ping);
        assert_eq!(parse_request("PING\r\n").unwrap(), Command::Ping);
    }

    #[test]
    fn full_request_parses() {
        let cmd = parse_request(" /tmp/in.png|/tmp/out.png|4.0\n").unwrap();
        assert_eq!(
            cmd,
            Command::Upscale(TransformRequest {
                input: PathBuf::from("/tmp/in.png"),
                output: PathBuf::from("/tmp/out.png"),
                scale: 4.0,
            })
        );
    }

    #[test]
    fn wrong_field_count_is_invalid_format() {
        for line in ["a|b", "a|b|c|d", "hello"] {
            let err = parse_request(line).unwrap_err();
            assert_eq!(
                error_reply(&err),
                "ERROR: Invalid format. Expected INPUT|OUTPUT|SCALE"
            );
        }
    }

    #[test]
    fn bad_scale_is_a_protocol_error() {
        for line in ["a|b|notanumber", "a|b|0", "a|b|-2", "a|b|inf", "a|b|NaN"] {
            let err = parse_request(line).unwrap_err();
            assert_eq!(err.category(), "protocol", "{}", line);
            assert!(error_reply(&err).starts_with("ERROR: Invalid scale"));
        }
    }

    #[test]
    fn replies() {
        let ok: ServiceResult<Outcome> = Ok(Outcome::Single { size: Size::new(4, 4) });
        assert_eq!(reply_for(&ok), "SUCCESS");
        let err: ServiceResult<Outcome> = Err(ServiceError::input_not_found("/tmp/x.png"));
        assert_eq!(reply_for(&err), "ERROR: Could not read image /tmp/x.png");
    }
}
