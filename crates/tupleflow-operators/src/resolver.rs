//! The scope resolution steps shared by every node kind.
//!
//! Each step consumes the results of the previous one, so callers run them in
//! this order: arguments, arity, declared, output, remainder.

use tupleflow_core::error::{Error, Result};
use tupleflow_core::fields::{Fields, Sentinel};

use crate::traits::Arity;

/// Step 1: resolve an argument selector against what is available.
///
/// `grouping` is the active grouping key; `none()` outside a grouping.
pub fn resolve_arguments(selector: &Fields, available: &Fields, grouping: &Fields) -> Result<Fields> {
    match selector.sentinel() {
        Some(Sentinel::All) | Some(Sentinel::Unknown) => Ok(available.clone()),
        Some(Sentinel::None) => Ok(Fields::none()),
        Some(Sentinel::Group) => {
            if grouping.is_none() {
                return Err(Error::SchemaConflict(
                    "GROUP arguments are only valid inside a grouping".into(),
                ));
            }
            Ok(grouping.clone())
        }
        Some(Sentinel::Values) => {
            if grouping.is_none() {
                return Err(Error::SchemaConflict(
                    "VALUES arguments are only valid inside a grouping".into(),
                ));
            }
            available.subtract(grouping)
        }
        Some(other) => Err(Error::SchemaConflict(format!(
            "{other} is not a valid argument selector"
        ))),
        None => available.select(selector),
    }
}

/// Step 2: the resolved arguments must satisfy the operation's arity.
pub fn verify_arity(operation: &str, arity: Arity, arguments: &Fields) -> Result<()> {
    match arity {
        Arity::Any => Ok(()),
        Arity::AtLeast(_) if arguments.is_unknown() => Ok(()),
        Arity::AtLeast(required) if arguments.len() < required => Err(Error::Arity {
            operation: operation.to_string(),
            required,
            resolved: arguments.len(),
        }),
        Arity::AtLeast(_) => Ok(()),
    }
}

/// Step 3: expand what the operation declares into concrete fields.
pub fn resolve_declared(
    node: &str,
    declared: &Fields,
    arguments: &Fields,
    pass_through: &Fields,
    output_selector: &Fields,
    grouping_active: bool,
) -> Result<Fields> {
    let resolved = if output_selector.is_replace() {
        replace_declaration(declared, arguments)?
    } else {
        match declared.sentinel() {
            Some(Sentinel::Unknown) => Fields::unknown(),
            Some(Sentinel::Args) => arguments.as_declaration(),
            Some(Sentinel::All) => pass_through.clone(),
            Some(Sentinel::None) => Fields::none(),
            Some(other) => {
                return Err(Error::SchemaConflict(format!(
                    "'{node}': {other} is not a valid field declaration"
                )))
            }
            None => declared.clone(),
        }
    };

    if grouping_active && resolved.is_defined() && resolved.is_empty() {
        return Err(Error::EmptyDeclaration {
            node: node.to_string(),
            declared: declared.to_string(),
        });
    }
    Ok(resolved)
}

fn replace_declaration(declared: &Fields, arguments: &Fields) -> Result<Fields> {
    if declared.is_unknown() || arguments.is_unknown() {
        return Ok(Fields::unknown());
    }
    if declared.is_args() {
        return Ok(arguments.clone());
    }
    if !declared.is_defined() {
        return Err(Error::SchemaConflict(format!(
            "cannot replace arguments {arguments} with {declared}"
        )));
    }
    if declared.len() != arguments.len() {
        return Err(Error::SchemaConflict(format!(
            "replace requires declared fields {declared} to match arguments {arguments} in size"
        )));
    }
    arguments.project(declared)
}

/// Step 4: resolve the output selector into the outgoing fields.
pub fn resolve_output(
    node: &str,
    selector: &Fields,
    arguments: &Fields,
    declared: &Fields,
    pass_through: &Fields,
) -> Result<Fields> {
    let outgoing = match selector.sentinel() {
        Some(Sentinel::Results) => declared.clone(),
        Some(Sentinel::Args) => arguments.clone(),
        Some(Sentinel::None) => Fields::none(),
        Some(Sentinel::Unknown) => Fields::unknown(),
        Some(Sentinel::Swap) => {
            if arguments.is_unknown() {
                Fields::unknown()
            } else {
                pass_through.subtract(arguments)?.append(declared)?
            }
        }
        Some(Sentinel::Replace) | Some(Sentinel::All) => {
            Fields::resolve(selector, &[pass_through, declared])?
        }
        Some(other) => {
            return Err(Error::SchemaConflict(format!(
                "'{node}': {other} is not a valid output selector"
            )))
        }
        None => Fields::resolve(selector, &[pass_through, declared])?,
    };

    if !selector.is_none() && outgoing.is_defined() && outgoing.is_empty() {
        return Err(Error::EmptyOutput {
            node: node.to_string(),
            selector: selector.to_string(),
        });
    }
    Ok(outgoing)
}

/// Step 5: pass-through fields not consumed as arguments.
pub fn resolve_remainder(pass_through: &Fields, arguments: &Fields) -> Result<Fields> {
    if arguments.is_unknown() || pass_through.is_unknown() {
        return Ok(Fields::unknown());
    }
    pass_through.subtract(arguments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(names: &[&str]) -> Fields {
        Fields::new(names.iter().copied()).unwrap()
    }

    #[test]
    fn arguments_follow_the_selector() {
        let available = f(&["k", "a", "b"]);
        let grouping = f(&["k"]);
        assert_eq!(
            resolve_arguments(&Fields::all(), &available, &grouping).unwrap(),
            available
        );
        assert_eq!(
            resolve_arguments(&Fields::values(), &available, &grouping).unwrap(),
            f(&["a", "b"])
        );
        assert_eq!(
            resolve_arguments(&Fields::group(), &available, &grouping).unwrap(),
            grouping
        );
        assert!(resolve_arguments(&Fields::group(), &available, &Fields::none()).is_err());
    }

    #[test]
    fn arity_rejects_short_arguments() {
        let err = verify_arity("sum2", Arity::AtLeast(2), &f(&["a"])).unwrap_err();
        assert_eq!(
            err,
            Error::Arity {
                operation: "sum2".into(),
                required: 2,
                resolved: 1
            }
        );
        verify_arity("sum2", Arity::AtLeast(2), &Fields::unknown()).unwrap();
        verify_arity("any", Arity::Any, &Fields::none()).unwrap();
    }

    #[test]
    fn declared_expands_sentinels() {
        let args = f(&["a"]);
        let pass = f(&["a", "b"]);
        let results = Fields::results();
        assert_eq!(
            resolve_declared("n", &Fields::args(), &args, &pass, &results, false).unwrap(),
            args
        );
        assert_eq!(
            resolve_declared("n", &Fields::all(), &args, &pass, &results, false).unwrap(),
            pass
        );
        assert!(resolve_declared("n", &Fields::unknown(), &args, &pass, &results, false)
            .unwrap()
            .is_unknown());
        let err =
            resolve_declared("n", &Fields::empty(), &args, &pass, &results, true).unwrap_err();
        assert!(matches!(err, Error::EmptyDeclaration { .. }));
    }

    #[test]
    fn replace_requires_matching_sizes() {
        let args = f(&["a", "b"]);
        let pass = f(&["a", "b", "c"]);
        let err = resolve_declared("n", &f(&["x"]), &args, &pass, &Fields::replace(), false)
            .unwrap_err();
        assert!(matches!(err, Error::SchemaConflict(_)));
        let declared = Fields::size(2).unwrap();
        assert_eq!(
            resolve_declared("n", &declared, &args, &pass, &Fields::replace(), false).unwrap(),
            args
        );
    }

    #[test]
    fn output_selectors() {
        let args = f(&["a"]);
        let declared = f(&["x"]);
        let pass = f(&["a", "b"]);
        let out = |sel: &Fields| resolve_output("n", sel, &args, &declared, &pass);
        assert_eq!(out(&Fields::results()).unwrap(), declared);
        assert_eq!(out(&Fields::args()).unwrap(), args);
        assert_eq!(out(&Fields::all()).unwrap(), f(&["a", "b", "x"]));
        assert_eq!(out(&Fields::swap()).unwrap(), f(&["b", "x"]));
        assert_eq!(out(&f(&["x", "b"])).unwrap(), f(&["x", "b"]));
        assert!(matches!(
            out(&f(&["zzz"])),
            Err(Error::UnresolvedField { .. })
        ));
    }

    #[test]
    fn empty_output_is_rejected() {
        let err = resolve_output(
            "n",
            &Fields::results(),
            &Fields::none(),
            &Fields::empty(),
            &Fields::empty(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::EmptyOutput { .. }));
    }

    #[test]
    fn remainder_drops_arguments() {
        assert_eq!(
            resolve_remainder(&f(&["a", "b"]), &f(&["a"])).unwrap(),
            f(&["b"])
        );
        assert!(resolve_remainder(&Fields::unknown(), &f(&["a"]))
            .unwrap()
            .is_unknown());
    }
}
