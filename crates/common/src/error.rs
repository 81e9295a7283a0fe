use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Message too large: {len} bytes (max {max})")]
    InputTooLarge { len: usize, max: usize },

    #[error("Iterations must be between {min} and {max} (got {value})")]
    IterationsOutOfRange { value: u32, min: u32, max: u32 },

    #[error("Unknown program: {0}")]
    UnknownProgram(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_violated_bound() {
        let err = Error::InputTooLarge { len: 2049, max: 2048 };
        assert_eq!(err.to_string(), "Message too large: 2049 bytes (max 2048)");

        let err = Error::IterationsOutOfRange {
            value: 0,
            min: 1,
            max: 100,
        };
        assert_eq!(err.to_string(), "Iterations must be between 1 and 100 (got 0)");
    }
}
