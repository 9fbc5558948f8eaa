use common::logical_plan::*;
use common::{ApplyParameterId, OrmError};
use std::collections::BTreeSet;

type Required = BTreeSet<usize>;

fn lost_column(what: &str) -> OrmError {
    OrmError::ValidationError(format!("{} reads a removed column", what))
}

/// Map from the old header to positions in `kept`, which lists surviving old indexes in order.
fn map_from_kept(old_len: usize, kept: &[usize]) -> ColumnMap {
    let mut map = vec![None; old_len];
    for (new, old) in kept.iter().enumerate() {
        map[*old] = Some(new);
    }
    map
}

fn mapped(map: &[Option<usize>], i: usize, what: &str) -> Result<usize, OrmError> {
    map.get(i).copied().flatten().ok_or_else(|| lost_column(what))
}

/// Removes columns no ancestor reads.
///
/// Returns the rewritten tree and the map from the old root header to the
/// new one. Headers only shrink, never below one column.
///
/// # Arguments
///
/// * `root` - Root of the provider tree.
/// * `required` - Root columns read by the item projector.
pub fn remove_redundant_columns(
    root: &Provider,
    required: &BTreeSet<usize>,
) -> Result<(Provider, ColumnMap), OrmError> {
    if let Some(i) = required.iter().find(|i| **i >= root.header().len()) {
        return Err(OrmError::ValidationError(format!(
            "Required column {} out of range for {}",
            i,
            root.header()
        )));
    }
    let (provider, map) = rebuild(root, required.clone())?;
    let (provider, map) = project_root(provider, map, required)?;
    debug!(
        "Column removal: {} -> {} root columns",
        root.header().len(),
        provider.header().len()
    );
    Ok((provider, map))
}

/// Rebuilds `p` keeping at least the `required` output columns.
fn rebuild(p: &Provider, mut required: Required) -> Result<(Provider, ColumnMap), OrmError> {
    let len = p.header().len();
    if required.is_empty() && len > 0 {
        required.insert(0);
    }
    match p.kind() {
        ProviderKind::Raw {
            rows,
            columns,
            projection,
        } => {
            if required.len() == len {
                return Ok((p.clone(), identity(len)));
            }
            let kept: Vec<usize> = required.iter().copied().collect();
            let physical: Vec<usize> = kept
                .iter()
                .map(|i| projection.as_ref().map_or(*i, |proj| proj[*i]))
                .collect();
            let res = Provider::raw_projected(columns.clone(), rows.clone(), physical)?;
            Ok((res, map_from_kept(len, &kept)))
        }
        ProviderKind::Index {
            table,
            index,
            alias,
            table_header,
            columns,
        } => {
            if required.len() == len {
                return Ok((p.clone(), identity(len)));
            }
            let kept: Vec<usize> = required.iter().copied().collect();
            let physical = kept.iter().map(|i| columns[*i]).collect();
            let res =
                Provider::index_columns(table, index, alias, table_header.clone(), physical)?;
            Ok((res, map_from_kept(len, &kept)))
        }
        ProviderKind::Filter { source, predicate } => {
            required.extend(predicate.columns());
            let (child, map) = rebuild(source, required)?;
            let predicate = predicate
                .remap(&map)
                .ok_or_else(|| lost_column("Filter"))?;
            Ok((Provider::filter(child, predicate), map))
        }
        ProviderKind::Select { source, columns } => {
            let kept: Vec<usize> = required.iter().copied().collect();
            let child_required = kept.iter().map(|k| columns[*k]).collect();
            let (child, cmap) = rebuild(source, child_required)?;
            let mut new_columns = Vec::with_capacity(kept.len());
            for k in &kept {
                new_columns.push(mapped(&cmap, columns[*k], "Select")?);
            }
            Ok((Provider::select(child, new_columns)?, map_from_kept(len, &kept)))
        }
        ProviderKind::Calculate { source, columns } => {
            let width = source.header().len();
            let kept_calcs: Vec<usize> = (0..columns.len())
                .filter(|j| required.contains(&(width + j)))
                .collect();
            let mut child_required: Required =
                required.iter().copied().filter(|i| *i < width).collect();
            for j in &kept_calcs {
                child_required.extend(columns[*j].expression.columns());
            }
            let (child, cmap) = rebuild(source, child_required)?;
            let new_width = child.header().len();
            let mut map = cmap;
            map.resize(len, None);
            let mut new_calcs = Vec::with_capacity(kept_calcs.len());
            for (rank, j) in kept_calcs.iter().enumerate() {
                let calc = &columns[*j];
                let expression = calc
                    .expression
                    .remap(&map[..width])
                    .ok_or_else(|| lost_column("Calculate"))?;
                new_calcs.push(CalculatedColumn {
                    column: calc.column.clone(),
                    expression,
                });
                map[width + j] = Some(new_width + rank);
            }
            if new_calcs.is_empty() {
                return Ok((child, map));
            }
            Ok((Provider::calculate(child, new_calcs), map))
        }
        ProviderKind::Alias { source, alias } => {
            let (child, map) = rebuild(source, required)?;
            Ok((Provider::alias(child, alias), map))
        }
        ProviderKind::Join {
            left,
            right,
            kind,
            equal_indexes,
        } => {
            let lw = left.header().len();
            let (mut lreq, mut rreq) = split(&required, lw);
            for (l, r) in equal_indexes {
                lreq.insert(*l);
                rreq.insert(*r);
            }
            let (l, lmap) = rebuild(left, lreq)?;
            let (r, rmap) = rebuild(right, rreq)?;
            let mut keys = Vec::with_capacity(equal_indexes.len());
            for (li, ri) in equal_indexes {
                keys.push((mapped(&lmap, *li, "Join")?, mapped(&rmap, *ri, "Join")?));
            }
            let map = concat_maps(lmap, rmap, l.header().len());
            Ok((Provider::join(l, r, *kind, keys)?, map))
        }
        ProviderKind::PredicateJoin {
            left,
            right,
            kind,
            predicate,
        } => {
            let lw = left.header().len();
            let mut all = required.clone();
            all.extend(predicate.columns());
            let (lreq, rreq) = split(&all, lw);
            let (l, lmap) = rebuild(left, lreq)?;
            let (r, rmap) = rebuild(right, rreq)?;
            let map = concat_maps(lmap, rmap, l.header().len());
            let predicate = predicate
                .remap(&map)
                .ok_or_else(|| lost_column("PredicateJoin"))?;
            Ok((Provider::predicate_join(l, r, *kind, predicate), map))
        }
        ProviderKind::Apply {
            left,
            right,
            parameter,
            kind,
        } => {
            let lw = left.header().len();
            let (mut lreq, rreq) = split(&required, lw);
            lreq.extend(right.apply_parameter_indexes(*parameter));
            let (l, lmap) = rebuild(left, lreq)?;
            let right = remap_parameter(right, *parameter, &lmap)?;
            let (r, rmap) = rebuild(&right, rreq)?;
            let map = concat_maps(lmap, rmap, l.header().len());
            Ok((Provider::apply(l, r, *parameter, *kind), map))
        }
        ProviderKind::Existence { source, negated } => {
            let (child, _) = rebuild(source, Required::new())?;
            let name = p
                .header()
                .get(0)
                .map(|c| c.name.clone())
                .unwrap_or_default();
            Ok((Provider::existence(child, &name, *negated), identity(len)))
        }
        ProviderKind::Aggregate {
            source,
            group_indexes,
            columns,
        } => {
            let groups = group_indexes.len();
            let mut kept_aggs: Vec<usize> = (0..columns.len())
                .filter(|j| required.contains(&(groups + j)))
                .collect();
            if kept_aggs.is_empty() && groups == 0 && !columns.is_empty() {
                kept_aggs.push(0);
            }
            let mut child_required: Required = group_indexes.iter().copied().collect();
            for j in &kept_aggs {
                if let Some(s) = columns[*j].source_index {
                    child_required.insert(s);
                }
            }
            let (child, cmap) = rebuild(source, child_required)?;
            let mut new_groups = Vec::with_capacity(groups);
            for g in group_indexes {
                new_groups.push(mapped(&cmap, *g, "Aggregate")?);
            }
            let mut new_columns = Vec::with_capacity(kept_aggs.len());
            for j in &kept_aggs {
                let mut col = columns[*j].clone();
                if let Some(s) = col.source_index {
                    col.source_index = Some(mapped(&cmap, s, "Aggregate")?);
                }
                new_columns.push(col);
            }
            let mut kept: Vec<usize> = (0..groups).collect();
            kept.extend(kept_aggs.iter().map(|j| groups + j));
            let res = Provider::aggregate_with_columns(child, new_groups, new_columns)?;
            Ok((res, map_from_kept(len, &kept)))
        }
        ProviderKind::Sort { source, order } => {
            required.extend(order.iter().map(|(i, _)| *i));
            let (child, map) = rebuild(source, required)?;
            let mut new_order = Vec::with_capacity(order.len());
            for (i, dir) in order {
                new_order.push((mapped(&map, *i, "Sort")?, *dir));
            }
            Ok((Provider::sort(child, new_order)?, map))
        }
        ProviderKind::Take { source, count } => {
            let (child, map) = rebuild(source, required)?;
            Ok((Provider::take(child, count.clone()), map))
        }
        ProviderKind::Skip { source, count } => {
            let (child, map) = rebuild(source, required)?;
            Ok((Provider::skip(child, count.clone()), map))
        }
        ProviderKind::Distinct { source } => {
            // Dropping a column changes which rows are distinct.
            let (child, map) = rebuild(source, (0..len).collect())?;
            Ok((Provider::distinct(child), map))
        }
        ProviderKind::Set {
            op: SetOp::Concat,
            left,
            right,
        } => {
            let kept: Vec<usize> = required.iter().copied().collect();
            let (l, lmap) = rebuild(left, required.clone())?;
            let (r, rmap) = rebuild(right, required)?;
            let l = narrow(l, &lmap, &kept)?;
            let r = narrow(r, &rmap, &kept)?;
            Ok((Provider::set(SetOp::Concat, l, r)?, map_from_kept(len, &kept)))
        }
        ProviderKind::Set { op, left, right } => {
            let all: Vec<usize> = (0..len).collect();
            let (l, lmap) = rebuild(left, all.iter().copied().collect())?;
            let (r, rmap) = rebuild(right, all.iter().copied().collect())?;
            let l = narrow(l, &lmap, &all)?;
            let r = narrow(r, &rmap, &all)?;
            Ok((Provider::set(*op, l, r)?, identity(len)))
        }
    }
}

/// Drops root columns that only nodes below the root read, such as filter
/// conditions and the inputs of calculated columns.
///
/// The select goes under the sorting and paging at the top of the tree, so
/// sort keys stay selected and the ordered level stays the outermost one.
fn project_root(
    root: Provider,
    map: ColumnMap,
    required: &BTreeSet<usize>,
) -> Result<(Provider, ColumnMap), OrmError> {
    let mut keep = Required::new();
    for i in required {
        keep.insert(mapped(&map, *i, "Root")?);
    }
    if keep.is_empty() {
        return Ok((root, map));
    }
    let mut node = &root;
    loop {
        match node.kind() {
            ProviderKind::Sort { source, order } => {
                keep.extend(order.iter().map(|(i, _)| *i));
                node = source;
            }
            ProviderKind::Take { source, .. }
            | ProviderKind::Skip { source, .. }
            | ProviderKind::Alias { source, .. } => node = source,
            _ => break,
        }
    }
    let len = root.header().len();
    if keep.len() == len {
        return Ok((root, map));
    }
    let kept: Vec<usize> = keep.into_iter().collect();
    let inner = map_from_kept(len, &kept);
    let res = select_under_top(&root, &kept, &inner)?;
    let map = map.into_iter().map(|m| m.and_then(|i| inner[i])).collect();
    Ok((res, map))
}

fn select_under_top(p: &Provider, kept: &[usize], map: &[Option<usize>]) -> Result<Provider, OrmError> {
    match p.kind() {
        ProviderKind::Sort { source, order } => {
            let child = select_under_top(source, kept, map)?;
            let mut new_order = Vec::with_capacity(order.len());
            for (i, dir) in order {
                new_order.push((mapped(map, *i, "Sort")?, *dir));
            }
            Provider::sort(child, new_order)
        }
        ProviderKind::Take { source, count } => {
            Ok(Provider::take(select_under_top(source, kept, map)?, count.clone()))
        }
        ProviderKind::Skip { source, count } => {
            Ok(Provider::skip(select_under_top(source, kept, map)?, count.clone()))
        }
        ProviderKind::Alias { source, alias } => {
            Ok(Provider::alias(select_under_top(source, kept, map)?, alias))
        }
        _ => Provider::select(p.clone(), kept.to_vec()),
    }
}

fn identity(len: usize) -> ColumnMap {
    (0..len).map(Some).collect()
}

/// Required columns of the left and right side of a binary provider.
fn split(required: &Required, left_width: usize) -> (Required, Required) {
    let left = required.iter().copied().filter(|i| *i < left_width).collect();
    let right = required
        .iter()
        .filter(|i| **i >= left_width)
        .map(|i| i - left_width)
        .collect();
    (left, right)
}

fn concat_maps(left: ColumnMap, right: ColumnMap, new_left_width: usize) -> ColumnMap {
    let mut map = left;
    map.extend(right.into_iter().map(|m| m.map(|i| i + new_left_width)));
    map
}

/// Exactly the `kept` old columns, in order; a select is added when the rebuilt side has more.
fn narrow(p: Provider, map: &[Option<usize>], kept: &[usize]) -> Result<Provider, OrmError> {
    let mut positions = Vec::with_capacity(kept.len());
    for k in kept {
        positions.push(mapped(map, *k, "Set operation")?);
    }
    let is_identity =
        positions.len() == p.header().len() && positions.iter().enumerate().all(|(i, j)| i == *j);
    if is_identity {
        Ok(p)
    } else {
        Provider::select(p, positions)
    }
}

/// Moves the outer reads through `parameter` in the whole subtree after the outer side shrank.
fn remap_parameter(
    p: &Provider,
    parameter: ApplyParameterId,
    map: &[Option<usize>],
) -> Result<Provider, OrmError> {
    p.try_map_expressions(&mut |e| e.remap_apply_parameter(parameter, map))
        .ok_or_else(|| lost_column("Apply"))
}
