//! Expense allocation.
//!
//! [`allocate`] turns an amount, the participants sharing it and a
//! [`SplitPolicy`] into per-participant shares. Shares are whole cents and
//! always add up to the amount exactly; leftover cents from rounding go to the
//! largest fractional remainders, first listed participant on ties.
//!
//! [`apply_allocation`] folds shares into the balance table. Together with
//! closing a transaction it is the only place balances change.

use indexmap::{IndexMap, IndexSet};
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::{EngineError, Id, Money, ResultEngine, participants::Participants};

/// Allowed deviation of a percentage split from 100%.
pub const PERCENTAGE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Allowed deviation of an amounts split from the expense total.
pub const AMOUNT_TOLERANCE: Money = Money::ONE_CENT;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SplitPolicy {
    Equal,
    /// Fractions of 1 keyed by participant.
    Percentages { percentages: IndexMap<Id, Decimal> },
    /// Fixed amounts keyed by participant.
    Amounts { amounts: IndexMap<Id, Money> },
    /// Proportional to each participant's sharing weight named `weight_name`.
    Weighted { weight_name: String },
}

impl SplitPolicy {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::Percentages { .. } => "percentages",
            Self::Amounts { .. } => "amounts",
            Self::Weighted { .. } => "weighted",
        }
    }
}

pub type Shares = IndexMap<Id, Money>;

/// Computes each participant's share of `amount`.
///
/// `table` is only read: it provides names for error messages and the sharing
/// weights of the weighted policy.
pub fn allocate(
    amount: Money,
    participants: &[Id],
    policy: &SplitPolicy,
    table: &Participants,
) -> ResultEngine<Shares> {
    if !amount.is_positive() {
        return Err(EngineError::Validation(format!(
            "expense amount must be > 0, got {amount}"
        )));
    }
    if participants.is_empty() {
        return Err(EngineError::Validation(
            "an expense needs at least one participant".to_string(),
        ));
    }
    let mut unique = IndexSet::with_capacity(participants.len());
    for id in participants {
        table.get_by_id(id)?;
        if !unique.insert(*id) {
            return Err(EngineError::Validation(format!(
                "{} is listed twice",
                table.name_of(id)
            )));
        }
    }

    match policy {
        SplitPolicy::Equal => {
            let ratios: Vec<(Id, Decimal)> =
                participants.iter().map(|id| (*id, Decimal::ONE)).collect();
            apportion(amount, &ratios)
        }
        SplitPolicy::Percentages { percentages } => {
            ensure_same_members(participants, percentages.keys(), table, "percentages")?;
            if let Some((id, pct)) = percentages.iter().find(|(_, pct)| pct.is_sign_negative()) {
                return Err(EngineError::Validation(format!(
                    "percentage of {} is negative: {pct}",
                    table.name_of(id)
                )));
            }
            let sum: Decimal = percentages.values().sum();
            if (sum - Decimal::ONE).abs() > PERCENTAGE_TOLERANCE {
                return Err(EngineError::Validation(format!(
                    "percentages add up to {sum}, expected 1 (tolerance {PERCENTAGE_TOLERANCE})"
                )));
            }
            let ratios: Vec<(Id, Decimal)> =
                participants.iter().map(|id| (*id, percentages[id])).collect();
            apportion(amount, &ratios)
        }
        SplitPolicy::Amounts { amounts } => {
            ensure_same_members(participants, amounts.keys(), table, "amounts")?;
            if let Some((id, value)) = amounts.iter().find(|(_, value)| value.is_negative()) {
                return Err(EngineError::Validation(format!(
                    "amount for {} is negative: {value}",
                    table.name_of(id)
                )));
            }
            let sum: Money = amounts.values().sum();
            let deviation = amount - sum;
            if !deviation.within(AMOUNT_TOLERANCE) {
                return Err(EngineError::Validation(format!(
                    "amounts add up to {sum} but the expense is {amount} (deviation {deviation})"
                )));
            }
            let mut shares: Shares = participants.iter().map(|id| (*id, amounts[id])).collect();
            if !deviation.is_zero() {
                absorb_residual(&mut shares, deviation);
            }
            Ok(shares)
        }
        SplitPolicy::Weighted { weight_name } => {
            let mut ratios = Vec::with_capacity(participants.len());
            for id in participants {
                let participant = table.get_by_id(id)?;
                let weight = participant.weight(weight_name).ok_or_else(|| {
                    EngineError::Validation(format!(
                        "{} has no sharing weight named \"{weight_name}\"",
                        participant.name
                    ))
                })?;
                if weight.is_sign_negative() && !weight.is_zero() {
                    return Err(EngineError::Validation(format!(
                        "sharing weight \"{weight_name}\" of {} is negative: {weight}",
                        participant.name
                    )));
                }
                ratios.push((*id, weight));
            }
            if ratios.iter().all(|(_, weight)| weight.is_zero()) {
                tracing::warn!(
                    "all \"{weight_name}\" weights are zero, counting every participant as 1"
                );
                for (_, weight) in &mut ratios {
                    *weight = Decimal::ONE;
                }
            }
            apportion(amount, &ratios)
        }
    }
}

fn ensure_same_members<'a>(
    participants: &[Id],
    keys: impl Iterator<Item = &'a Id>,
    table: &Participants,
    label: &str,
) -> ResultEngine<()> {
    let expected: IndexSet<Id> = participants.iter().copied().collect();
    let given: IndexSet<Id> = keys.copied().collect();
    if expected == given {
        return Ok(());
    }
    let names = |ids: &IndexSet<Id>| {
        ids.iter()
            .map(|id| table.name_of(id))
            .collect::<Vec<_>>()
            .join(", ")
    };
    Err(EngineError::Validation(format!(
        "the {label} don't cover exactly the members involved: members [{}], {label} [{}]",
        names(&expected),
        names(&given)
    )))
}

/// Puts a residual of at most one cent on the largest share.
fn absorb_residual(shares: &mut Shares, residual: Money) {
    let target = shares
        .iter()
        .fold(None::<(Id, Money)>, |best, (id, share)| match best {
            Some((_, best_share)) if best_share >= *share => best,
            _ => Some((*id, *share)),
        });
    if let Some((id, _)) = target
        && let Some(share) = shares.get_mut(&id)
    {
        tracing::debug!("absorbing {residual} rounding residual into the share of {id}");
        *share += residual;
    }
}

/// Largest-remainder apportionment of `amount` proportionally to `ratios`.
fn apportion(amount: Money, ratios: &[(Id, Decimal)]) -> ResultEngine<Shares> {
    let overflow = || EngineError::InvalidAmount(format!("cannot split {amount}"));
    let total_ratio: Decimal = ratios.iter().map(|(_, ratio)| *ratio).sum();
    if total_ratio.is_zero() {
        return Err(EngineError::Validation(
            "split ratios add up to zero".to_string(),
        ));
    }
    let cents = Decimal::from(amount.cents());

    let mut shares = Shares::with_capacity(ratios.len());
    let mut remainders = Vec::with_capacity(ratios.len());
    for (index, (id, ratio)) in ratios.iter().enumerate() {
        let exact = cents
            .checked_mul(*ratio)
            .and_then(|v| v.checked_div(total_ratio))
            .ok_or_else(overflow)?;
        let floor = exact.round_dp_with_strategy(0, RoundingStrategy::ToNegativeInfinity);
        let floor_cents = floor.to_i64().ok_or_else(overflow)?;
        shares.insert(*id, Money::new(floor_cents));
        remainders.push((exact - floor, index));
    }

    let assigned: Money = shares.values().sum();
    let leftover = (amount - assigned).cents();
    // Stable sort keeps list order among equal remainders.
    remainders.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, index) in remainders.into_iter().take(leftover.max(0) as usize) {
        if let Some((_, share)) = shares.get_index_mut(index) {
            *share += Money::ONE_CENT;
        }
    }
    Ok(shares)
}

/// Folds an allocation into the balance table: the payer is credited with
/// the full amount and every participant is debited with their share.
pub fn apply_allocation(
    table: &mut Participants,
    payer: &Id,
    amount: Money,
    shares: &Shares,
) -> ResultEngine<()> {
    ensure_known(table, payer, shares)?;
    let buyer = table.get_mut(payer)?;
    buyer.add_spent(amount);
    buyer.apply_delta(amount);
    for (id, share) in shares {
        table.get_mut(id)?.apply_delta(-*share);
    }
    Ok(())
}

/// Exact inverse of [`apply_allocation`].
pub fn revert_allocation(
    table: &mut Participants,
    payer: &Id,
    amount: Money,
    shares: &Shares,
) -> ResultEngine<()> {
    ensure_known(table, payer, shares)?;
    let buyer = table.get_mut(payer)?;
    buyer.add_spent(-amount);
    buyer.apply_delta(-amount);
    for (id, share) in shares {
        table.get_mut(id)?.apply_delta(*share);
    }
    Ok(())
}

fn ensure_known(table: &Participants, payer: &Id, shares: &Shares) -> ResultEngine<()> {
    table.get_by_id(payer)?;
    for id in shares.keys() {
        table.get_by_id(id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IdKind, participants::Participant};
    use rstest::{fixture, rstest};

    fn mm(seq: u32) -> Id {
        Id::new(IdKind::Member, seq)
    }

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    #[fixture]
    fn table() -> Participants {
        let mut table = Participants::new();
        table
            .add(Participant::new(mm(0), "A").with_weight("days", dec("3")))
            .unwrap();
        table
            .add(Participant::new(mm(1), "B").with_weight("days", dec("1")))
            .unwrap();
        table
            .add(Participant::new(mm(2), "C").with_weight("days", dec("0")))
            .unwrap();
        table
    }

    #[rstest]
    #[case::even(900, vec![300, 300, 300])]
    #[case::one_leftover(1000, vec![334, 333, 333])]
    #[case::two_leftover(1001, vec![334, 334, 333])]
    #[case::smaller_than_group(2, vec![1, 1, 0])]
    fn equal_split_hands_leftover_cents_to_first_listed(
        table: Participants,
        #[case] amount: i64,
        #[case] expected: Vec<i64>,
    ) {
        let shares = allocate(
            Money::new(amount),
            &[mm(0), mm(1), mm(2)],
            &SplitPolicy::Equal,
            &table,
        )
        .unwrap();
        let got: Vec<i64> = shares.values().map(|m| m.cents()).collect();
        assert_eq!(got, expected);
        assert_eq!(shares.values().sum::<Money>(), Money::new(amount));
    }

    #[rstest]
    fn equal_split_rejects_empty_participants(table: Participants) {
        let err = allocate(Money::new(100), &[], &SplitPolicy::Equal, &table).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[rstest]
    fn duplicated_participant_is_rejected(table: Participants) {
        let err = allocate(Money::new(100), &[mm(0), mm(0)], &SplitPolicy::Equal, &table)
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[rstest]
    fn non_positive_amount_is_rejected(table: Participants) {
        let err = allocate(Money::ZERO, &[mm(0)], &SplitPolicy::Equal, &table).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[rstest]
    fn percentages_split_by_fraction(table: Participants) {
        let policy = SplitPolicy::Percentages {
            percentages: IndexMap::from([(mm(0), dec("0.25")), (mm(1), dec("0.75"))]),
        };
        let shares = allocate(Money::new(2000), &[mm(0), mm(1)], &policy, &table).unwrap();
        assert_eq!(shares[&mm(0)], Money::new(500));
        assert_eq!(shares[&mm(1)], Money::new(1500));
    }

    #[rstest]
    #[case::too_low("0.5", "0.3")]
    #[case::too_high("0.7", "0.5")]
    fn percentages_outside_tolerance_fail(
        table: Participants,
        #[case] first: &str,
        #[case] second: &str,
    ) {
        let policy = SplitPolicy::Percentages {
            percentages: IndexMap::from([(mm(0), dec(first)), (mm(1), dec(second))]),
        };
        let err = allocate(Money::new(2000), &[mm(0), mm(1)], &policy, &table).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[rstest]
    fn percentages_within_tolerance_stay_zero_sum(table: Participants) {
        let policy = SplitPolicy::Percentages {
            percentages: IndexMap::from([(mm(0), dec("0.333")), (mm(1), dec("0.666"))]),
        };
        let shares = allocate(Money::new(1000), &[mm(0), mm(1)], &policy, &table).unwrap();
        assert_eq!(shares.values().sum::<Money>(), Money::new(1000));
        assert_eq!(shares[&mm(0)], Money::new(333));
        assert_eq!(shares[&mm(1)], Money::new(667));
    }

    #[rstest]
    fn percentages_must_cover_exactly_the_participants(table: Participants) {
        let policy = SplitPolicy::Percentages {
            percentages: IndexMap::from([(mm(0), dec("0.5")), (mm(2), dec("0.5"))]),
        };
        let err = allocate(Money::new(1000), &[mm(0), mm(1)], &policy, &table).unwrap_err();
        let EngineError::Validation(msg) = err else {
            panic!("expected a validation error");
        };
        assert!(msg.contains("members [A, B]"), "{msg}");
    }

    #[rstest]
    fn amounts_keep_given_values(table: Participants) {
        let policy = SplitPolicy::Amounts {
            amounts: IndexMap::from([(mm(0), Money::new(250)), (mm(1), Money::new(750))]),
        };
        let shares = allocate(Money::new(1000), &[mm(0), mm(1)], &policy, &table).unwrap();
        assert_eq!(shares[&mm(0)], Money::new(250));
        assert_eq!(shares[&mm(1)], Money::new(750));
    }

    #[rstest]
    fn amounts_absorb_one_cent_into_largest_share(table: Participants) {
        let policy = SplitPolicy::Amounts {
            amounts: IndexMap::from([(mm(0), Money::new(250)), (mm(1), Money::new(749))]),
        };
        let shares = allocate(Money::new(1000), &[mm(0), mm(1)], &policy, &table).unwrap();
        assert_eq!(shares[&mm(1)], Money::new(750));
        assert_eq!(shares.values().sum::<Money>(), Money::new(1000));
    }

    #[rstest]
    fn amounts_off_by_more_than_a_cent_fail(table: Participants) {
        let policy = SplitPolicy::Amounts {
            amounts: IndexMap::from([(mm(0), Money::new(250)), (mm(1), Money::new(740))]),
        };
        let err = allocate(Money::new(1000), &[mm(0), mm(1)], &policy, &table).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[rstest]
    fn weighted_split_uses_named_weight(table: Participants) {
        let policy = SplitPolicy::Weighted {
            weight_name: "days".to_string(),
        };
        let shares = allocate(Money::new(1000), &[mm(0), mm(1), mm(2)], &policy, &table).unwrap();
        assert_eq!(shares[&mm(0)], Money::new(750));
        assert_eq!(shares[&mm(1)], Money::new(250));
        assert_eq!(shares[&mm(2)], Money::ZERO);
    }

    #[rstest]
    fn weighted_split_with_all_zero_weights_falls_back_to_equal(table: Participants) {
        let policy = SplitPolicy::Weighted {
            weight_name: "days".to_string(),
        };
        let shares = allocate(Money::new(1000), &[mm(2)], &policy, &table).unwrap();
        assert_eq!(shares[&mm(2)], Money::new(1000));
    }

    #[rstest]
    fn weighted_split_requires_the_weight(table: Participants) {
        let policy = SplitPolicy::Weighted {
            weight_name: "nights".to_string(),
        };
        let err = allocate(Money::new(1000), &[mm(0)], &policy, &table).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[rstest]
    fn apply_then_revert_restores_the_table(mut table: Participants) {
        let before = table.clone();
        let shares = allocate(
            Money::new(1000),
            &[mm(0), mm(1), mm(2)],
            &SplitPolicy::Equal,
            &table,
        )
        .unwrap();

        apply_allocation(&mut table, &mm(0), Money::new(1000), &shares).unwrap();
        assert_eq!(table.get_by_id(&mm(0)).unwrap().balance, Money::new(666));
        assert_eq!(table.get_by_id(&mm(0)).unwrap().spent_total, Money::new(1000));
        assert_eq!(table.get_by_id(&mm(1)).unwrap().balance, Money::new(-333));
        assert_eq!(table.total(), Money::ZERO);

        revert_allocation(&mut table, &mm(0), Money::new(1000), &shares).unwrap();
        assert_eq!(table, before);
    }
}
