use common::logical_plan::*;
use common::{ApplyParameterId, OrmError};
use std::collections::{BTreeSet, HashMap};

/// Filter taken out of an apply's right side.
#[derive(Clone, Debug)]
struct CapturedFilter {
    predicate: TupleExpr,
    /// Column names of the header the predicate was evaluated over.
    names: Vec<String>,
}

/// Conjunction of the filters captured for one apply parameter.
#[derive(Clone, Debug)]
struct PendingPredicate {
    filters: Vec<CapturedFilter>,
    /// Names of the columns the filters read.
    columns: BTreeSet<String>,
}

/// Pending predicates by parameter; `None` marks a predicate that can no longer be lifted.
type Scope = HashMap<ApplyParameterId, Option<PendingPredicate>>;

/// What happens to the predicates of a binary side when they reach the parent.
#[derive(Clone, Copy, PartialEq)]
enum Side {
    Plain,
    /// Optional side of an outer join; its correlated filters cannot move
    /// above the join, except those of `exempt`.
    Optional(Option<ApplyParameterId>),
}

fn fault(message: impl Into<String>) -> OrmError {
    OrmError::CorrectionFault(message.into())
}

fn requalify(name: &str, alias: &str) -> String {
    match name.rfind('.') {
        Some(i) => format!("{}.{}", alias, &name[i + 1..]),
        None => format!("{}.{}", alias, name),
    }
}

/// Rewrites applies into predicate joins.
///
/// Filters of an apply's right side that read the apply parameter are lifted
/// out of the subtree and become the join predicate. Existence and aggregate
/// applies are left alone.
pub struct ApplyCorrector {
    /// Propagate faults instead of falling back to the unconverted tree.
    strict: bool,
    scopes: Vec<Scope>,
    self_convertible: HashMap<ApplyParameterId, bool>,
}

impl ApplyCorrector {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            scopes: Vec::new(),
            self_convertible: HashMap::new(),
        }
    }

    /// Converts every convertible apply in the tree.
    ///
    /// On a correction fault the unconverted tree is returned, or the fault
    /// if the corrector is strict.
    ///
    /// # Arguments
    ///
    /// * `root` - Root of the provider tree.
    pub fn correct(&mut self, root: &Provider) -> Result<Provider, OrmError> {
        self.self_convertible.clear();
        self.scopes = vec![Scope::new()];
        let res = self.visit(root);
        self.scopes.clear();
        match res {
            Ok(p) => Ok(p),
            Err(OrmError::CorrectionFault(msg)) if !self.strict => {
                warn!("Apply correction abandoned: {}", msg);
                Ok(root.clone())
            }
            Err(e) => Err(e),
        }
    }

    fn scope(&mut self) -> Result<&mut Scope, OrmError> {
        self.scopes
            .last_mut()
            .ok_or_else(|| fault("corrector scope stack is empty"))
    }

    /// Visits one side of a binary provider in its own scope and merges the scope into the parent.
    fn visit_side(&mut self, p: &Provider, side: Side) -> Result<Provider, OrmError> {
        self.scopes.push(Scope::new());
        let res = self.visit(p);
        let child_scope = self
            .scopes
            .pop()
            .ok_or_else(|| fault("corrector scope stack is empty"))?;
        let res = res?;
        let parent = self.scope()?;
        for (parameter, mut pending) in child_scope {
            if let Side::Optional(exempt) = side {
                if exempt != Some(parameter) {
                    pending = None;
                }
            }
            match parent.get_mut(&parameter) {
                Some(existing) => {
                    if existing.is_some() {
                        return Err(fault(format!(
                            "{} has predicates on both sides of a binary provider",
                            parameter
                        )));
                    }
                    *existing = pending;
                }
                None => {
                    parent.insert(parameter, pending);
                }
            }
        }
        Ok(res)
    }

    fn invalidate_all(&mut self) -> Result<(), OrmError> {
        for pending in self.scope()?.values_mut() {
            *pending = None;
        }
        Ok(())
    }

    fn visit(&mut self, p: &Provider) -> Result<Provider, OrmError> {
        match p.kind() {
            ProviderKind::Raw { .. } | ProviderKind::Index { .. } => Ok(p.clone()),
            ProviderKind::Filter { source, predicate } => {
                let source = self.visit(source)?;
                match self.liftable_parameter(predicate) {
                    Some(parameter) => {
                        self.save_predicate(parameter, predicate, &source)?;
                        Ok(source)
                    }
                    None => Ok(Provider::filter(source, predicate.clone())),
                }
            }
            ProviderKind::Select { source, columns } => {
                let source = self.visit(source)?;
                let res = Provider::select(source, columns.clone())?;
                for pending in self.scope()?.values_mut() {
                    let lost = match pending {
                        Some(pp) => pp.columns.iter().any(|c| !res.header().contains(c)),
                        None => false,
                    };
                    if lost {
                        *pending = None;
                    }
                }
                Ok(res)
            }
            ProviderKind::Calculate { source, columns } => {
                let source = self.visit(source)?;
                Ok(Provider::calculate(source, columns.clone()))
            }
            ProviderKind::Alias { source, alias } => {
                let source = self.visit(source)?;
                for pending in self.scope()?.values_mut().flatten() {
                    pending.columns = pending
                        .columns
                        .iter()
                        .map(|c| requalify(c, alias))
                        .collect();
                    for filter in pending.filters.iter_mut() {
                        filter.names = filter.names.iter().map(|c| requalify(c, alias)).collect();
                    }
                }
                Ok(Provider::alias(source, alias))
            }
            ProviderKind::Join {
                left,
                right,
                kind,
                equal_indexes,
            } => {
                let (l, r) = self.visit_binary(left, right, *kind)?;
                Provider::join(l, r, *kind, equal_indexes.clone())
            }
            ProviderKind::PredicateJoin {
                left,
                right,
                kind,
                predicate,
            } => {
                let (l, r) = self.visit_binary(left, right, *kind)?;
                Ok(Provider::predicate_join(l, r, *kind, predicate.clone()))
            }
            ProviderKind::Apply {
                left,
                right,
                parameter,
                kind,
            } => self.visit_apply(left, right, *parameter, *kind),
            ProviderKind::Existence { source, negated } => {
                let source = self.visit(source)?;
                // Correlated filters inside an existence test decide the test itself.
                self.invalidate_all()?;
                let name = p
                    .header()
                    .get(0)
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                Ok(Provider::existence(source, &name, *negated))
            }
            ProviderKind::Aggregate {
                source,
                group_indexes,
                columns,
            } => {
                let source = self.visit(source)?;
                let res = Provider::aggregate_with_columns(
                    source,
                    group_indexes.clone(),
                    columns.clone(),
                )?;
                let groups: BTreeSet<&str> = res
                    .header()
                    .columns()
                    .take(group_indexes.len())
                    .map(|c| c.name.as_str())
                    .collect();
                let scalar = group_indexes.is_empty();
                for pending in self.scope()?.values_mut() {
                    let lost = match pending {
                        Some(pp) => {
                            scalar || pp.columns.iter().any(|c| !groups.contains(c.as_str()))
                        }
                        None => false,
                    };
                    if lost {
                        *pending = None;
                    }
                }
                Ok(res)
            }
            ProviderKind::Sort { source, order } => {
                let source = self.visit(source)?;
                Provider::sort(source, order.clone())
            }
            ProviderKind::Take { source, count } => {
                let source = self.visit(source)?;
                self.validate_take_skip("Take")?;
                Ok(Provider::take(source, count.clone()))
            }
            ProviderKind::Skip { source, count } => {
                let source = self.visit(source)?;
                self.validate_take_skip("Skip")?;
                Ok(Provider::skip(source, count.clone()))
            }
            ProviderKind::Distinct { source } => {
                let source = self.visit(source)?;
                Ok(Provider::distinct(source))
            }
            ProviderKind::Set { op, left, right } => {
                let l = self.visit_side(left, Side::Optional(None))?;
                let r = self.visit_side(right, Side::Optional(None))?;
                Provider::set(*op, l, r)
            }
        }
    }

    fn visit_binary(
        &mut self,
        left: &Provider,
        right: &Provider,
        kind: JoinKind,
    ) -> Result<(Provider, Provider), OrmError> {
        let (left_side, right_side) = match kind {
            JoinKind::Inner | JoinKind::Cross => (Side::Plain, Side::Plain),
            JoinKind::LeftOuter => (Side::Plain, Side::Optional(None)),
            JoinKind::FullOuter => (Side::Optional(None), Side::Optional(None)),
        };
        let l = self.visit_side(left, left_side)?;
        let r = self.visit_side(right, right_side)?;
        Ok((l, r))
    }

    /// The only apply parameter a filter reads, if the filter can be lifted for it.
    fn liftable_parameter(&self, predicate: &TupleExpr) -> Option<ApplyParameterId> {
        let active: Vec<ApplyParameterId> = predicate
            .apply_parameters()
            .into_iter()
            .filter(|p| self.self_convertible.contains_key(p))
            .collect();
        match active.as_slice() {
            [parameter] if self.self_convertible.get(parameter) == Some(&false) => {
                Some(*parameter)
            }
            _ => None,
        }
    }

    fn save_predicate(
        &mut self,
        parameter: ApplyParameterId,
        predicate: &TupleExpr,
        source: &Provider,
    ) -> Result<(), OrmError> {
        let names: Vec<String> = source.header().columns().map(|c| c.name.clone()).collect();
        let mut columns = BTreeSet::new();
        for i in predicate.columns() {
            match names.get(i) {
                Some(name) => {
                    columns.insert(name.clone());
                }
                None => return Err(fault(format!("Predicate {} reads a missing column", predicate))),
            }
        }
        debug!("Lifting predicate {} for {}", predicate, parameter);
        let captured = CapturedFilter {
            predicate: predicate.clone(),
            names,
        };
        let scope = self.scope()?;
        match scope.get_mut(&parameter) {
            None => {
                scope.insert(
                    parameter,
                    Some(PendingPredicate {
                        filters: vec![captured],
                        columns,
                    }),
                );
            }
            Some(None) => {}
            Some(Some(pending)) => {
                pending.filters.push(captured);
                pending.columns.extend(columns);
            }
        }
        Ok(())
    }

    fn validate_take_skip(&mut self, what: &str) -> Result<(), OrmError> {
        if self.scope()?.is_empty() {
            Ok(())
        } else {
            Err(fault(format!(
                "{} cannot be moved past a correlated predicate",
                what
            )))
        }
    }

    fn visit_apply(
        &mut self,
        left: &Provider,
        right: &Provider,
        parameter: ApplyParameterId,
        kind: ApplyKind,
    ) -> Result<Provider, OrmError> {
        let self_convertible = kind.is_self_convertible();
        self.self_convertible.insert(parameter, self_convertible);
        let right_side = match kind {
            ApplyKind::Outer => Side::Optional(Some(parameter)),
            _ => Side::Plain,
        };
        let visited = self
            .visit_side(left, Side::Plain)
            .and_then(|l| Ok((l, self.visit_side(right, right_side)?)));
        self.self_convertible.remove(&parameter);
        let (l, r) = visited?;
        let join_kind = match kind {
            ApplyKind::Outer => JoinKind::LeftOuter,
            _ => JoinKind::Inner,
        };

        if self_convertible {
            self.scope()?.remove(&parameter);
            return Ok(Provider::apply(l, r, parameter, kind));
        }

        let pending = match self.scope()?.remove(&parameter) {
            None => {
                if r.references_parameter(parameter) {
                    return Err(fault(format!(
                        "{} is read outside of a filter of the apply's right side",
                        parameter
                    )));
                }
                debug!("Uncorrelated {} becomes a cross join", parameter);
                return Ok(Provider::predicate_join(
                    l,
                    r,
                    join_kind,
                    TupleExpr::true_literal(),
                ));
            }
            Some(None) => {
                return Err(fault(format!(
                    "Predicate of {} was invalidated",
                    parameter
                )))
            }
            Some(Some(pending)) => pending,
        };
        if pending.columns.is_empty() {
            return Err(fault(format!("Predicate of {} reads no columns", parameter)));
        }
        if r.references_parameter(parameter) {
            return Err(fault(format!(
                "{} is still read by the apply's right side",
                parameter
            )));
        }

        let offset = l.header().len();
        let mut conjuncts = Vec::with_capacity(pending.filters.len());
        for filter in &pending.filters {
            let rewritten = filter.predicate.try_map_leaves(&mut |leaf| match leaf {
                TupleExpr::Column(i) => {
                    let name = filter.names.get(*i)?;
                    r.header()
                        .index_of(name)
                        .map(|j| TupleExpr::Column(offset + j))
                }
                TupleExpr::ApplyParam { parameter: p, index } if *p == parameter => {
                    Some(TupleExpr::Column(*index))
                }
                other => Some(other.clone()),
            });
            match rewritten {
                Some(e) => conjuncts.push(e),
                None => {
                    return Err(fault(format!(
                        "Predicate {} reads columns missing from the join",
                        filter.predicate
                    )))
                }
            }
        }
        let predicate = match TupleExpr::conjunction(conjuncts) {
            Some(p) => p,
            None => TupleExpr::true_literal(),
        };
        debug!("{} converted to a predicate join on {}", parameter, predicate);
        Ok(Provider::predicate_join(l, r, join_kind, predicate))
    }
}
