//! Property-based tests for share ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Supply conservation: Σ(balances) == total supply
//! - Order independence: an account's owed amount ignores the order of other
//!   accounts' mints, burns and transfers
//! - Loss follows shares: transfers never create or destroy owed loss
//! - Bounded dust: fewer than one unit per holder once the carried remainder
//!   is drained, at most one unit per holder otherwise

use ledger_core::{AccountId, Channel, ShareLedger};
use proptest::prelude::*;

/// Ledger operation for random sequences
#[derive(Debug, Clone)]
enum Op {
    Mint(usize, u64),
    Burn(usize, u64),
    Transfer(usize, usize, u64),
    Distribute(Channel, u64),
}

fn accounts() -> Vec<AccountId> {
    (0..4).map(|i| AccountId::new(format!("holder-{}", i))).collect()
}

/// Strategy for generating ledger operations
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..4, 1u64..1_000_000).prop_map(|(a, amount)| Op::Mint(a, amount)),
        (0usize..4, 1u64..1_000_000).prop_map(|(a, amount)| Op::Burn(a, amount)),
        (0usize..4, 0usize..4, 1u64..1_000_000).prop_map(|(a, b, amount)| Op::Transfer(a, b, amount)),
        (
            prop_oneof![Just(Channel::Reward), Just(Channel::Yield), Just(Channel::Loss)],
            0u64..10_000_000
        )
            .prop_map(|(channel, amount)| Op::Distribute(channel, amount)),
    ]
}

/// Balance change among accounts other than the target (index 0)
fn other_op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..4, 1u64..10_000).prop_map(|(a, amount)| Op::Mint(a, amount)),
        (1usize..4, 1u64..10_000).prop_map(|(a, amount)| Op::Burn(a, amount)),
        (1usize..4, 1usize..4, 1u64..10_000).prop_map(|(a, b, amount)| Op::Transfer(a, b, amount)),
    ]
}

fn apply(ledger: &mut ShareLedger, accounts: &[AccountId], op: &Op) -> ledger_core::Result<()> {
    match op {
        Op::Mint(a, amount) => ledger.mint(&accounts[*a], *amount).map(|_| ()),
        Op::Burn(a, amount) => ledger.burn(&accounts[*a], *amount).map(|_| ()),
        Op::Transfer(a, b, amount) => ledger.transfer(&accounts[*a], &accounts[*b], *amount).map(|_| ()),
        Op::Distribute(channel, amount) => ledger.distribute(*channel, *amount).map(|_| ()),
    }
}

fn remainder(ledger: &ShareLedger) -> u128 {
    ledger
        .accumulator(Channel::Reward)
        .map(|acc| acc.remainder())
        .unwrap_or(0)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: Σ(balances) == total supply after any operation sequence
    #[test]
    fn prop_supply_conservation(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let accounts = accounts();
        let mut ledger = ShareLedger::with_all_channels();

        for op in ops {
            // Failed operations must not disturb the invariant either
            let _ = match op {
                Op::Mint(a, amount) => ledger.mint(&accounts[a], amount).map(|_| ()),
                Op::Burn(a, amount) => ledger.burn(&accounts[a], amount).map(|_| ()),
                Op::Transfer(a, b, amount) => ledger.transfer(&accounts[a], &accounts[b], amount).map(|_| ()),
                Op::Distribute(channel, amount) => ledger.distribute(channel, amount).map(|_| ()),
            };

            prop_assert!(ledger.check_invariants().is_ok());
            let sum: u64 = ledger.holders().map(|(_, balance)| balance).sum();
            prop_assert_eq!(sum, ledger.total_supply());
        }
    }

    /// Property: owed amounts never exceed what was distributed
    #[test]
    fn prop_owed_bounded_by_distributions(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let accounts = accounts();
        let mut ledger = ShareLedger::with_all_channels();
        let mut distributed_rewards: u64 = 0;

        for op in ops {
            match op {
                Op::Mint(a, amount) => { let _ = ledger.mint(&accounts[a], amount); }
                Op::Burn(a, amount) => { let _ = ledger.burn(&accounts[a], amount); }
                Op::Transfer(a, b, amount) => { let _ = ledger.transfer(&accounts[a], &accounts[b], amount); }
                Op::Distribute(channel, amount) => {
                    if ledger.distribute(channel, amount).is_ok() && channel == Channel::Reward {
                        distributed_rewards += amount;
                    }
                }
            }
        }

        let total_owed: u64 = accounts
            .iter()
            .map(|a| ledger.owed(Channel::Reward, a).unwrap())
            .sum();
        prop_assert!(total_owed <= distributed_rewards);

        for account in &accounts {
            prop_assert!(ledger.owed(Channel::Loss, account).unwrap() <= ledger.balance_of(account));
        }
    }

    /// Property: the order of other accounts' balance changes does not change a target's claim
    #[test]
    fn prop_owed_independent_of_other_accounts_order(
        epochs in prop::collection::vec(
            (0u64..10_000, prop::collection::vec(other_op_strategy(), 0..6), 1u64..1_000_000),
            1..8
        )
    ) {
        let accounts = accounts();
        let target = &accounts[0];
        let mut forward = ShareLedger::with_all_channels();
        let mut reversed = ShareLedger::with_all_channels();

        // Large seed balances keep every burn and transfer valid in any order
        for other in &accounts[1..] {
            forward.mint(other, 1_000_000_000).unwrap();
            reversed.mint(other, 1_000_000_000).unwrap();
        }

        for (target_mint, others, amount) in epochs {
            if target_mint > 0 {
                forward.mint(target, target_mint).unwrap();
                reversed.mint(target, target_mint).unwrap();
            }
            for op in &others {
                apply(&mut forward, &accounts, op).unwrap();
            }
            for op in others.iter().rev() {
                apply(&mut reversed, &accounts, op).unwrap();
            }

            prop_assert_eq!(forward.total_supply(), reversed.total_supply());
            for channel in [Channel::Reward, Channel::Loss] {
                forward.distribute(channel, amount).unwrap();
                reversed.distribute(channel, amount).unwrap();
            }
        }

        for channel in [Channel::Reward, Channel::Loss] {
            prop_assert_eq!(
                forward.owed(channel, target).unwrap(),
                reversed.owed(channel, target).unwrap()
            );
        }
    }

    /// Property: transfers move owed loss between holders without changing its total
    #[test]
    fn prop_transfers_conserve_owed_loss(
        balances in prop::collection::vec(1u64..1_000_000, 2..5),
        loss_ratio in 0u64..=100,
        transfers in prop::collection::vec((0usize..4, 0usize..5, 1u64..1_000_000), 1..20),
    ) {
        let accounts: Vec<AccountId> = (0..5)
            .map(|i| AccountId::new(format!("holder-{}", i)))
            .collect();
        let mut ledger = ShareLedger::with_all_channels();
        for (account, balance) in accounts.iter().zip(&balances) {
            ledger.mint(account, *balance).unwrap();
        }

        let loss = ledger.total_supply() * loss_ratio / 100;
        ledger.distribute(Channel::Loss, loss).unwrap();

        let total_loss = |ledger: &ShareLedger| -> u64 {
            accounts.iter().map(|a| ledger.owed(Channel::Loss, a).unwrap()).sum()
        };
        let before = total_loss(&ledger);

        for (from, to, amount) in transfers {
            let _ = ledger.transfer(&accounts[from], &accounts[to], amount);

            prop_assert_eq!(total_loss(&ledger), before);
            for account in &accounts {
                prop_assert!(ledger.owed(Channel::Loss, account).unwrap() <= ledger.balance_of(account));
            }
        }
    }

    /// Property: one distribution loses at most one unit per holder, fewer once nothing is carried
    #[test]
    fn prop_dust_bounded_by_holder_count(
        balances in prop::collection::vec(1u64..1_000_000, 1..8),
        amount in 0u64..1_000_000_000,
    ) {
        let accounts: Vec<AccountId> = (0..balances.len())
            .map(|i| AccountId::new(format!("holder-{}", i)))
            .collect();
        let mut ledger = ShareLedger::with_all_channels();
        for (account, balance) in accounts.iter().zip(&balances) {
            ledger.mint(account, *balance).unwrap();
        }

        ledger.distribute(Channel::Reward, amount).unwrap();

        let mut paid = 0u64;
        for account in &accounts {
            paid += ledger.recognize(Channel::Reward, account).unwrap();
        }

        let holders = accounts.len() as u64;
        prop_assert!(paid <= amount);
        prop_assert!(amount - paid <= holders);
        if remainder(&ledger) == 0 {
            prop_assert!(amount - paid < holders);
        }
    }

    /// Property: repeated distributions do not accumulate dust
    #[test]
    fn prop_dust_does_not_accumulate(
        balances in prop::collection::vec(1u64..1_000, 1..6),
        amounts in prop::collection::vec(1u64..1_000, 1..50),
    ) {
        let accounts: Vec<AccountId> = (0..balances.len())
            .map(|i| AccountId::new(format!("holder-{}", i)))
            .collect();
        let mut ledger = ShareLedger::with_all_channels();
        for (account, balance) in accounts.iter().zip(&balances) {
            ledger.mint(account, *balance).unwrap();
        }

        let mut distributed = 0u64;
        for amount in amounts {
            ledger.distribute(Channel::Reward, amount).unwrap();
            distributed += amount;
        }

        let owed: u64 = accounts
            .iter()
            .map(|a| ledger.owed(Channel::Reward, a).unwrap())
            .sum();
        let holders = accounts.len() as u64;
        prop_assert!(owed <= distributed);
        prop_assert!(distributed - owed <= holders);
        if remainder(&ledger) == 0 {
            prop_assert!(distributed - owed < holders);
        }
    }

    /// Property: evenly divisible distributions lose nothing
    #[test]
    fn prop_evenly_divisible_has_no_dust(
        balances in prop::collection::vec(1u64..10_000, 1..8),
        per_share in 0u64..1_000,
    ) {
        let accounts: Vec<AccountId> = (0..balances.len())
            .map(|i| AccountId::new(format!("holder-{}", i)))
            .collect();
        let mut ledger = ShareLedger::with_all_channels();
        for (account, balance) in accounts.iter().zip(&balances) {
            ledger.mint(account, *balance).unwrap();
        }

        let amount = per_share * ledger.total_supply();
        ledger.distribute(Channel::Reward, amount).unwrap();

        for (account, balance) in accounts.iter().zip(&balances) {
            prop_assert_eq!(ledger.owed(Channel::Reward, account).unwrap(), per_share * balance);
        }
    }
}
