
// Instrument drivers.  The polling loop only needs something that can produce a `Reading` and be
// let go of afterwards, so that is all `Meter` asks for.

use std::io;

use crate::error::Result;
use crate::sample::Reading;

pub mod bird4480a;

pub trait Meter {
	// One complete pass over the measurement queries.  Nothing partial is ever returned.
	fn acquire(&mut self) -> Result<Reading>;

	// Hands the instrument back.  Called once when the session stops; implementations should
	// tolerate a second call.
	fn release(&mut self) -> io::Result<()>;
}

impl<M: Meter + ?Sized> Meter for Box<M> {
	fn acquire(&mut self) -> Result<Reading> { (**self).acquire() }
	fn release(&mut self) -> io::Result<()> { (**self).release() }
}
