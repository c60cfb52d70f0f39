use log::debug;

use crate::{job::status::ProbeOutcome, utils::round_up};

/// First candidate when the range still spans a full 48-bit address space.
/// Slightly above what 64-bit AddressSanitizer builds reserve up front.
pub const FIRST_GUESS: u64 = 1 << 45;

/// Runs the target once under a candidate limit
pub trait Probe {
  type Error;

  fn probe(&mut self, limit: u64) -> Result<ProbeOutcome, Self::Error>;
}

impl<F, E> Probe for F
where
  F: FnMut(u64) -> Result<ProbeOutcome, E>,
{
  type Error = E;

  fn probe(&mut self, limit: u64) -> Result<ProbeOutcome, E> {
    self(limit)
  }
}

/// Every value below `low` is known to fail, every value from `high` on
/// is assumed to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRange {
  pub low: u64,
  pub high: u64,
}

impl ProbeRange {
  pub fn new(low: u64, high: u64) -> Self {
    debug_assert!(low <= high);
    Self { low, high }
  }

  /// The next limit to try, always in `low..high`
  pub fn candidate(&self) -> u64 {
    debug_assert!(self.low < self.high);
    if self.low == 1 && self.high >> 46 != 0 {
      FIRST_GUESS
    } else {
      self.low + (self.high - self.low) / 2
    }
  }

  /// Narrow the range with what `candidate` told us
  pub fn record(&mut self, candidate: u64, outcome: &ProbeOutcome) {
    if outcome.is_success() {
      self.high = candidate;
    } else {
      self.low = candidate + 1;
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
  /// smallest passing limit, rounded up to the step, in bytes
  pub limit: u64,
  /// number of probes issued
  pub probes: usize,
}

/// Binary search over address space limits
#[derive(Debug, Clone)]
pub struct Search {
  range: ProbeRange,
  /// granularity below which probing stops, a power of two
  step: u64,
}

impl Search {
  pub fn new(range: ProbeRange, step: u64) -> Self {
    debug_assert!(step.is_power_of_two());
    Self { range, step }
  }

  /// whether the range still holds more than one displayable value
  pub fn is_open(&self) -> bool {
    round_up(self.range.low, self.step) < round_up(self.range.high, self.step)
  }

  /// Probe until the range collapses. Probes are issued one at a time.
  pub fn run<P: Probe>(mut self, probe: &mut P) -> Result<SearchResult, P::Error> {
    debug!(
      "searching {}..{} in steps of {}",
      self.range.low, self.range.high, self.step
    );
    let mut probes = 0;
    while self.is_open() {
      let candidate = self.range.candidate();
      let outcome = probe.probe(candidate)?;
      probes += 1;
      debug!("probe {probes}: {candidate} -> {outcome}");
      self.range.record(candidate, &outcome);
    }
    Ok(SearchResult {
      limit: round_up(self.range.low, self.step),
      probes,
    })
  }
}

#[cfg(test)]
mod test {
  use std::convert::Infallible;

  use super::{ProbeRange, Search, FIRST_GUESS};
  use crate::{job::status::ProbeOutcome, utils::round_up};

  fn threshold(t: u64) -> impl FnMut(u64) -> Result<ProbeOutcome, Infallible> {
    move |limit| {
      Ok(if limit >= t {
        ProbeOutcome::Success
      } else {
        ProbeOutcome::Signaled(libc::SIGSEGV)
      })
    }
  }

  fn bits(n: u64) -> usize {
    (64 - n.leading_zeros()) as usize
  }

  #[test]
  fn candidate_stays_in_range() {
    let ranges = [
      (0, 1),
      (1, 2),
      (5, 6),
      (5, 7),
      (1, 1 << 46),
      (2, 1 << 46),
      (1, (1 << 46) - 1),
      (u64::MAX - 1, u64::MAX),
      (0, u64::MAX),
      (1, u64::MAX),
    ];
    for (low, high) in ranges {
      let m = ProbeRange::new(low, high).candidate();
      assert!(low <= m && m < high, "{low}..{high} gave {m}");
    }
  }

  #[test]
  fn first_guess_only_for_wide_ranges() {
    assert_eq!(ProbeRange::new(1, 1 << 48).candidate(), FIRST_GUESS);
    assert_eq!(ProbeRange::new(1, 1 << 46).candidate(), FIRST_GUESS);
    assert_eq!(ProbeRange::new(1, 1 << 40).candidate(), 1 + ((1 << 40) - 1) / 2);
    assert_eq!(ProbeRange::new(2, 1 << 48).candidate(), 2 + ((1 << 48) - 2) / 2);
  }

  #[test]
  fn converges_to_threshold() {
    for t in [1, 2, 3, 4095, 4096, 4097, 10 << 20, (10 << 20) + 1, 1 << 45, (1 << 47) + 12345] {
      for step in [1, 4096, 1 << 20] {
        let result = Search::new(ProbeRange::new(1, 1 << 48), step)
          .run(&mut threshold(t))
          .unwrap();
        assert_eq!(result.limit, round_up(t, step), "threshold {t}, step {step}");
        assert!(result.probes <= bits((1 << 48) - 1) + 1);
      }
    }
  }

  #[test]
  fn probe_count_is_logarithmic() {
    for high in [2u64, 3, 10, 1000, 1 << 20, 1 << 30] {
      for t in [1, high / 3 + 1, high] {
        let result = Search::new(ProbeRange::new(1, high), 1)
          .run(&mut threshold(t))
          .unwrap();
        assert_eq!(result.limit, t);
        assert!(result.probes <= bits(high - 1), "{high}: {} probes", result.probes);
      }
    }
  }

  #[test]
  fn always_failing_converges_to_ceiling() {
    let mut never = |_: u64| Ok::<_, Infallible>(ProbeOutcome::Exited(1));
    let result = Search::new(ProbeRange::new(1, 1 << 48), 4096)
      .run(&mut never)
      .unwrap();
    assert_eq!(result.limit, 1 << 48);
  }

  #[test]
  fn always_passing_converges_to_first_step() {
    let mut always = |_: u64| Ok::<_, Infallible>(ProbeOutcome::Success);
    let result = Search::new(ProbeRange::new(1, 1 << 48), 4096)
      .run(&mut always)
      .unwrap();
    assert_eq!(result.limit, 4096);
  }

  #[test]
  fn collapsed_range_does_not_probe() {
    let mut unreachable = |_: u64| -> Result<ProbeOutcome, Infallible> { panic!("probed") };
    let search = Search::new(ProbeRange::new(4097, 8000), 4096);
    assert!(!search.is_open());
    let result = search.run(&mut unreachable).unwrap();
    assert_eq!(result, super::SearchResult { limit: 8192, probes: 0 });
  }

  #[test]
  fn probe_errors_stop_the_search() {
    let mut calls = 0;
    let mut broken = |_: u64| {
      calls += 1;
      Err::<ProbeOutcome, _>("harness fault")
    };
    let err = Search::new(ProbeRange::new(1, 1 << 20), 1)
      .run(&mut broken)
      .unwrap_err();
    assert_eq!(err, "harness fault");
    assert_eq!(calls, 1);
  }

  #[test]
  fn probes_are_ordered() {
    let mut seen = Vec::new();
    let mut probe = |limit: u64| {
      seen.push(limit);
      Ok::<_, Infallible>(if limit >= 300 {
        ProbeOutcome::Success
      } else {
        ProbeOutcome::Exited(1)
      })
    };
    Search::new(ProbeRange::new(1, 1024), 1).run(&mut probe).unwrap();
    assert_eq!(seen.first(), Some(&512));
    assert_eq!(seen.get(1), Some(&256));
  }
}
