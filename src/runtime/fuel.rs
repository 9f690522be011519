//! Fuel for the machine

#[derive(Debug, Clone)]
pub struct Fuel {
    fuel: i32,
}

impl Fuel {
    pub fn with(fuel: i32) -> Self {
        Self { fuel }
    }

    /// Fuel that for all practical purposes never runs out.
    pub fn unlimited() -> Self {
        Self::with(i32::MAX)
    }

    /// Refills fuel up to a given maximum.
    ///
    /// Credits fuel while preventing it from growing to an unbounded level, for
    /// callers that re-use one fuel container across evaluations.
    pub fn refill(&mut self, fuel: i32, max_fuel: i32) {
        self.fuel = self.fuel.max(0).saturating_add(fuel).min(max_fuel);
    }

    /// Subtract from the current remaining fuel.
    pub fn consume(&mut self, fuel: i32) {
        self.fuel = self.fuel.saturating_sub(fuel);
    }

    pub fn remaining(&self) -> i32 {
        self.fuel
    }

    pub fn should_continue(&self) -> bool {
        self.fuel > 0
    }
}

pub(crate) fn count_fuel(per_item: i32, count: usize) -> i32 {
    i32::try_from(count)
        .unwrap_or(i32::MAX)
        .saturating_mul(per_item)
}

#[cfg(test)]
mod tests {
    use super::{count_fuel, Fuel};
    use assert2::check;

    #[test]
    fn consume_and_refill() {
        let mut fuel = Fuel::with(3);
        fuel.consume(2);
        check!(fuel.should_continue());
        fuel.consume(5);
        check!(!fuel.should_continue());
        check!(fuel.remaining() == -4);
        fuel.refill(10, 4);
        check!(fuel.remaining() == 4);
        fuel.refill(10, 20);
        check!(fuel.remaining() == 14);
    }

    #[test]
    fn count_saturates() {
        check!(count_fuel(2, 3) == 6);
        check!(count_fuel(2, usize::MAX) == i32::MAX);
    }
}
