//! Static checks for reward and effect statements.

use super::expr::{AssignOp, Expr, Statement, BUILTINS};
use crate::error::{Error, Result};
use std::collections::HashSet;

/// Prefix giving access to the previous row's value of a field
pub const PREV_PREFIX: &str = "prev.";

/// Target a reward statement may assign
pub const REWARD_TARGET: &str = "reward";

/// Names visible to a reward expression.
pub(crate) struct RewardNames<'a> {
    fields: HashSet<&'a str>,
    actions: HashSet<&'a str>,
    functions: HashSet<&'a str>,
}

impl<'a> RewardNames<'a> {
    pub(crate) fn new(
        fields: impl IntoIterator<Item = &'a str>,
        actions: impl IntoIterator<Item = &'a str>,
        functions: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            fields: fields.into_iter().collect(),
            actions: actions.into_iter().collect(),
            functions: functions.into_iter().collect(),
        }
    }

    fn is_variable(&self, name: &str) -> bool {
        if self.fields.contains(name) || self.actions.contains(name) {
            return true;
        }
        name.strip_prefix(PREV_PREFIX)
            .is_some_and(|field| self.fields.contains(field))
    }

    /// Check variables and calls. `allow_functions` is false inside external
    /// reward functions, which may not call each other.
    pub(crate) fn check_expr(&self, expr: &Expr, allow_functions: bool) -> Result<()> {
        if let Some(name) = expr.variables().into_iter().find(|v| !self.is_variable(v)) {
            return Err(Error::Expression(format!("undeclared name '{}'", name)));
        }

        for (name, arity) in expr.calls() {
            if let Some((_, expected)) = BUILTINS.iter().find(|(b, _)| *b == name) {
                if *expected != arity {
                    return Err(Error::Expression(format!(
                        "'{}' takes {} arguments, got {}",
                        name, expected, arity
                    )));
                }
                continue;
            }
            if !allow_functions || !self.functions.contains(name) {
                return Err(Error::Expression(format!("undeclared function '{}'", name)));
            }
            if arity != 0 {
                return Err(Error::Expression(format!(
                    "reward function '{}' takes no arguments",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Parse and check one action's reward statement
    pub(crate) fn check_reward(&self, action: &str, source: &str) -> Result<Statement> {
        let stmt = Statement::parse(source)
            .map_err(|e| Error::Expression(format!("reward for '{}': {}", action, e)))?;
        if let Some((target, op)) = &stmt.target {
            if target != REWARD_TARGET || *op != AssignOp::Set {
                return Err(Error::Expression(format!(
                    "reward for '{}' may only assign '{} =', found '{} {}'",
                    action, REWARD_TARGET, target, op
                )));
            }
        }
        self.check_expr(&stmt.expr, true)
            .map_err(|e| Error::Expression(format!("reward for '{}': {}", action, e)))?;
        Ok(stmt)
    }

    /// Parse and check one external reward function body
    pub(crate) fn check_function(&self, name: &str, source: &str) -> Result<Expr> {
        let stmt = Statement::parse(source)
            .map_err(|e| Error::Expression(format!("reward function '{}': {}", name, e)))?;
        if stmt.target.as_ref().is_some_and(|(t, _)| t != REWARD_TARGET) {
            return Err(Error::Expression(format!(
                "reward function '{}' may only assign '{}'",
                name, REWARD_TARGET
            )));
        }
        self.check_expr(&stmt.expr, false)
            .map_err(|e| Error::Expression(format!("reward function '{}': {}", name, e)))?;
        Ok(stmt.expr)
    }
}

/// Parse and check a connector effect statement: the target must be a
/// declared field and the right-hand side may read fields and `prev.` fields.
pub fn check_effect(source: &str, fields: &[String]) -> Result<Statement> {
    let stmt = Statement::parse(source)?;
    let (target, _) = stmt
        .target
        .as_ref()
        .ok_or_else(|| Error::Expression(format!("effect '{}' assigns nothing", source)))?;
    if !fields.iter().any(|f| f == target) {
        return Err(Error::Expression(format!(
            "effect assigns undeclared field '{}'",
            target
        )));
    }
    let names = RewardNames::new(
        fields.iter().map(String::as_str),
        std::iter::empty(),
        std::iter::empty(),
    );
    names.check_expr(&stmt.expr, false)?;
    Ok(stmt)
}
