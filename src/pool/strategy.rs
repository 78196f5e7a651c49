//! Selection among equally eligible connections.

use rand::Rng;

use crate::config::Strategy;

/// Round-robin position over one set of connections.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(usize);

impl Cursor {
    pub fn position(&self) -> usize {
        self.0
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }
}

/// Pick one of `items` according to `strategy`. `None` only when empty.
///
/// `RoundRobin` returns `items[cursor]` and advances the cursor, wrapping to
/// the start after the last item. `Random` leaves the cursor alone.
pub fn pick<'a, T>(strategy: Strategy, items: &'a [T], cursor: &mut Cursor) -> Option<&'a T> {
    if items.is_empty() {
        return None;
    }
    let index = match strategy {
        Strategy::Random => rand::thread_rng().gen_range(0..items.len()),
        Strategy::RoundRobin => {
            let index = cursor.0 % items.len();
            cursor.0 = (index + 1) % items.len();
            index
        }
    };
    items.get(index)
}
