use common::logical_plan::*;
use common::OrmError;

type Order = Vec<(usize, Direction)>;

/// Moves sort orders to where they can be observed.
///
/// Sorts are lifted out of the tree and their effective order is restored
/// once at the root. A sort is kept physically only right below a take or
/// skip, where it decides which rows are kept. Orders that cannot reach
/// the root (beneath aggregates, existence tests, set operations or the
/// right side of joins) are dropped. Duplicate group columns are removed.
///
/// # Arguments
///
/// * `root` - Root of the provider tree.
pub fn correct_ordering(root: &Provider) -> Result<Provider, OrmError> {
    let (provider, order) = visit(root, true)?;
    if order.is_empty() {
        Ok(provider)
    } else {
        debug!("Restoring root order {:?}", order);
        Provider::sort(provider, order)
    }
}

fn visit(p: &Provider, observable: bool) -> Result<(Provider, Order), OrmError> {
    match p.kind() {
        ProviderKind::Raw { .. } | ProviderKind::Index { .. } => Ok((p.clone(), vec![])),
        ProviderKind::Sort { source, order } => {
            let (child, inner) = visit(source, observable)?;
            if !observable {
                return Ok((child, vec![]));
            }
            // Stable sort: the inner order breaks ties of the outer one.
            let mut effective = order.clone();
            for (i, dir) in inner {
                if !effective.iter().any(|(j, _)| *j == i) {
                    effective.push((i, dir));
                }
            }
            Ok((child, effective))
        }
        ProviderKind::Filter { source, predicate } => {
            let (child, order) = visit(source, observable)?;
            Ok((Provider::filter(child, predicate.clone()), order))
        }
        ProviderKind::Calculate { source, columns } => {
            let (child, order) = visit(source, observable)?;
            Ok((Provider::calculate(child, columns.clone()), order))
        }
        ProviderKind::Alias { source, alias } => {
            let (child, order) = visit(source, observable)?;
            Ok((Provider::alias(child, alias), order))
        }
        ProviderKind::Distinct { source } => {
            let (child, order) = visit(source, observable)?;
            Ok((Provider::distinct(child), order))
        }
        ProviderKind::Select { source, columns } => {
            let (child, order) = visit(source, observable)?;
            let mut selected = Vec::new();
            for (i, dir) in order {
                match columns.iter().position(|c| *c == i) {
                    Some(pos) => selected.push((pos, dir)),
                    None => break,
                }
            }
            Ok((Provider::select(child, columns.clone())?, selected))
        }
        ProviderKind::Take { source, count } | ProviderKind::Skip { source, count } => {
            let (child, order) = visit(source, true)?;
            let child = if order.is_empty() {
                child
            } else {
                Provider::sort(child, order.clone())?
            };
            let res = match p.kind() {
                ProviderKind::Take { .. } => Provider::take(child, count.clone()),
                _ => Provider::skip(child, count.clone()),
            };
            Ok((res, if observable { order } else { vec![] }))
        }
        ProviderKind::Join {
            left,
            right,
            kind,
            equal_indexes,
        } => {
            let (l, order) = visit(left, observable)?;
            let (r, _) = visit(right, false)?;
            let order = if *kind == JoinKind::FullOuter {
                vec![]
            } else {
                order
            };
            Ok((Provider::join(l, r, *kind, equal_indexes.clone())?, order))
        }
        ProviderKind::PredicateJoin {
            left,
            right,
            kind,
            predicate,
        } => {
            let (l, order) = visit(left, observable)?;
            let (r, _) = visit(right, false)?;
            let order = if *kind == JoinKind::FullOuter {
                vec![]
            } else {
                order
            };
            Ok((Provider::predicate_join(l, r, *kind, predicate.clone()), order))
        }
        ProviderKind::Apply {
            left,
            right,
            parameter,
            kind,
        } => {
            let (l, order) = visit(left, observable)?;
            let (r, _) = visit(right, false)?;
            Ok((Provider::apply(l, r, *parameter, *kind), order))
        }
        ProviderKind::Existence { source, negated } => {
            let (child, _) = visit(source, false)?;
            let name = match p.header().get(0) {
                Some(col) => col.name.clone(),
                None => {
                    return Err(OrmError::ValidationError(String::from(
                        "Existence without a result column",
                    )))
                }
            };
            Ok((Provider::existence(child, &name, *negated), vec![]))
        }
        ProviderKind::Aggregate {
            source,
            group_indexes,
            columns,
        } => {
            let (child, _) = visit(source, false)?;
            Ok((dedup_groups(child, group_indexes, columns)?, vec![]))
        }
        ProviderKind::Set { op, left, right } => {
            let (l, _) = visit(left, false)?;
            let (r, _) = visit(right, false)?;
            Ok((Provider::set(*op, l, r)?, vec![]))
        }
    }
}

/// Aggregate without repeated group columns; a select restores the original header.
fn dedup_groups(
    child: Provider,
    group_indexes: &[usize],
    columns: &[AggregateColumn],
) -> Result<Provider, OrmError> {
    let mut unique: Vec<usize> = Vec::new();
    let mut positions = Vec::with_capacity(group_indexes.len());
    for g in group_indexes {
        match unique.iter().position(|u| u == g) {
            Some(pos) => positions.push(pos),
            None => {
                positions.push(unique.len());
                unique.push(*g);
            }
        }
    }
    if unique.len() == group_indexes.len() {
        return Provider::aggregate_with_columns(child, unique, columns.to_vec());
    }
    debug!("Removing duplicate group columns {:?}", group_indexes);
    let width = unique.len();
    let agg = Provider::aggregate_with_columns(child, unique, columns.to_vec())?;
    positions.extend((0..columns.len()).map(|i| width + i));
    Provider::select(agg, positions)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::int_raw;
    use common::testutil::*;

    #[test]
    fn test_sort_lifted_to_root() {
        init();
        let sorted = Provider::sort(int_raw("a0", 3, 5), vec![(1, Direction::Descending)]).unwrap();
        let filtered = Provider::filter(
            sorted,
            TupleExpr::binary(
                BinaryOp::Greater,
                TupleExpr::Column(0),
                TupleExpr::literal(int(1)),
            ),
        );
        let res = correct_ordering(&filtered).unwrap();
        match res.kind() {
            ProviderKind::Sort { source, order } => {
                assert_eq!(order, &vec![(1, Direction::Descending)]);
                assert!(matches!(source.kind(), ProviderKind::Filter { .. }));
                assert!(matches!(
                    source.children()[0].kind(),
                    ProviderKind::Raw { .. }
                ));
            }
            other => panic!("expected sort, got {:?}", other),
        }
    }

    #[test]
    fn test_sort_kept_below_take() {
        let sorted = Provider::sort(int_raw("a0", 2, 5), vec![(0, Direction::Ascending)]).unwrap();
        let filtered = Provider::filter(sorted, TupleExpr::true_literal());
        let take = Provider::take(filtered, Count::Constant(2));
        let res = correct_ordering(&take).unwrap();
        // Sort(Take(Sort(Filter(Raw))))
        let take = res.children()[0];
        assert!(matches!(take.kind(), ProviderKind::Take { .. }));
        let inner = take.children()[0];
        assert!(matches!(inner.kind(), ProviderKind::Sort { .. }));
        assert!(matches!(
            inner.children()[0].kind(),
            ProviderKind::Filter { .. }
        ));
    }

    #[test]
    fn test_then_by() {
        let first = Provider::sort(int_raw("a0", 3, 5), vec![(2, Direction::Ascending)]).unwrap();
        let second = Provider::sort(
            first,
            vec![(1, Direction::Descending), (2, Direction::Descending)],
        )
        .unwrap();
        let res = correct_ordering(&second).unwrap();
        match res.kind() {
            ProviderKind::Sort { order, source } => {
                assert_eq!(
                    order,
                    &vec![(1, Direction::Descending), (2, Direction::Descending)]
                );
                assert!(matches!(source.kind(), ProviderKind::Raw { .. }));
            }
            other => panic!("expected sort, got {:?}", other),
        }
    }

    #[test]
    fn test_unobservable_sorts_removed() {
        let sorted = Provider::sort(int_raw("a0", 2, 5), vec![(0, Direction::Ascending)]).unwrap();
        let agg = Provider::aggregate(
            sorted,
            vec![1],
            vec![(String::from("c0"), AggregateKind::Count, None)],
        )
        .unwrap();
        let res = correct_ordering(&agg).unwrap();
        assert_eq!(res.node_count(), 2);

        let sorted = Provider::sort(int_raw("a1", 2, 5), vec![(0, Direction::Ascending)]).unwrap();
        let exists = Provider::existence(sorted, "c1", false);
        assert_eq!(correct_ordering(&exists).unwrap().node_count(), 2);
    }

    #[test]
    fn test_duplicate_group_columns() {
        let agg = Provider::aggregate(
            int_raw("a0", 3, 5),
            vec![1, 1, 2],
            vec![(String::from("c0"), AggregateKind::Sum, Some(0))],
        )
        .unwrap();
        let res = correct_ordering(&agg).unwrap();
        assert_eq!(res.header(), agg.header());
        match res.kind() {
            ProviderKind::Select { source, columns } => {
                assert_eq!(columns, &vec![0, 0, 1, 2]);
                match source.kind() {
                    ProviderKind::Aggregate { group_indexes, .. } => {
                        assert_eq!(group_indexes, &vec![1, 2])
                    }
                    other => panic!("expected aggregate, got {:?}", other),
                }
            }
            other => panic!("expected select, got {:?}", other),
        }
    }
}
