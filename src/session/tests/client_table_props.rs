//! Property tests for client-slot allocation.
//!
//! Checked against a naive model: for any attach/detach sequence the table
//! allocates the smallest free index, counts exactly the live attachments,
//! and never issues the same (index, generation) handle twice.

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::session::client_table::{ClientId, ClientTable};
use crate::transport::ClientConn;

#[derive(Debug, Clone)]
enum Op {
    Attach,
    /// Detach the n-th oldest live attachment (modulo the live count).
    Detach(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Attach),
        2 => (0usize..8).prop_map(Op::Detach),
    ]
}

proptest! {
    #[test]
    fn prop_allocation_matches_model(ops in proptest::collection::vec(op_strategy(), 1..60)) {
        let mut table = ClientTable::new();
        // Live attachments: handle -> connection kept alive on our side.
        let mut live: Vec<(ClientId, Arc<ClientConn>)> = Vec::new();
        let mut issued: HashSet<(usize, u64)> = HashSet::new();
        let mut next_conn = 0u64;

        for op in ops {
            match op {
                Op::Attach => {
                    let conn = Arc::new(ClientConn::new(next_conn, "prop"));
                    next_conn += 1;

                    // Model: smallest index not held by a live attachment.
                    let held: HashSet<usize> =
                        live.iter().map(|(id, _)| id.index()).collect();
                    let expected = (0..).find(|i| !held.contains(i)).unwrap();

                    let id = table.attach(&conn, 0);
                    prop_assert_eq!(id.index(), expected);
                    prop_assert!(
                        issued.insert((id.index(), id.generation())),
                        "handle must never repeat"
                    );
                    live.push((id, conn));
                }
                Op::Detach(n) => {
                    if live.is_empty() {
                        continue;
                    }
                    let (id, _conn) = live.remove(n % live.len());
                    prop_assert!(table.detach(id));
                    prop_assert!(table.lookup(id).is_none());
                }
            }

            prop_assert_eq!(table.valid_count(), live.len());
            for (id, _) in &live {
                prop_assert!(table.lookup(*id).is_some(), "live handle must stay stable");
            }
        }
    }

    #[test]
    fn prop_stream_ids_survive_unrelated_churn(churn in 1usize..20) {
        let mut table = ClientTable::new();
        let keeper = Arc::new(ClientConn::new(0, "keeper"));
        let kept = table.attach(&keeper, 999);

        let mut generations: HashMap<usize, Vec<u64>> = HashMap::new();
        for i in 0..churn {
            let conn = Arc::new(ClientConn::new(i as u64 + 1, "churn"));
            let id = table.attach(&conn, i as u16);
            generations.entry(id.index()).or_default().push(id.generation());
            table.detach(id);
        }

        // The kept attachment is untouched by churn on other slots.
        let slot = table.lookup(kept).unwrap();
        prop_assert_eq!(slot.stream_id(), 999);
        // Churned slots bump their generation on every occupation.
        for gens in generations.values() {
            let unique: HashSet<_> = gens.iter().collect();
            prop_assert_eq!(unique.len(), gens.len());
        }
    }
}
