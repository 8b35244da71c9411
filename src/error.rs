
use std::io;
use std::path::PathBuf;

use thiserror::Error;

// `Communication` and `Parse` only cost one tick; the polling loop logs them and carries on.  The
// rest end the run.
#[derive(Debug, Error)]
pub enum Error {
	#[error("unable to connect to {resource}: {source}")]
	Connection {
		resource: String,
		#[source]
		source: io::Error,
	},

	#[error("instrument at {resource} is not a {expected} (identified as '{identity}')")]
	WrongModel {
		resource: String,
		expected: String,
		identity: String,
	},

	#[error("no usable response to {command}: {source}")]
	Communication {
		command: &'static str,
		#[source]
		source: io::Error,
	},

	#[error("malformed response to {command}: {response:?}")]
	Parse {
		command: &'static str,
		response: String,
	},

	#[error("data file {}: {source}", path.display())]
	File {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("configuration: {0}")]
	Config(String),

	#[error("a session can only be run once")]
	AlreadyRun,
}

impl Error {
	pub fn is_recoverable(&self) -> bool {
		matches!(self, Error::Communication { .. } | Error::Parse { .. })
	}
}

pub type Result<T> = std::result::Result<T, Error>;
