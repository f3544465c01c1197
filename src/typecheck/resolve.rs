use crate::types::{TypeId, TypePool};

/// Parses a type annotation string (`"Array<Int>"`, `"Int?"`, ...) produced
/// by the parser back into a `TypeId`, reifying templates as needed.
pub fn resolve_type_name(pool: &mut TypePool, name: &str) -> Result<TypeId, ()> {
    let (base, optional) = match name.strip_suffix('?') {
        Some(rest) => (rest, true),
        None => (name, false),
    };
    let ty = if let Some(lt) = base.find('<') {
        let head = &base[..lt];
        let inner = &base[lt + 1..base.len() - 1];
        let args = split_top_level(inner);
        match head {
            "Array" => {
                let elem = resolve_type_name(pool, args[0])?;
                pool.array_of(elem)
            }
            "Map" => {
                let k = resolve_type_name(pool, args[0])?;
                let v = resolve_type_name(pool, args[1])?;
                pool.map_of(k, v)
            }
            "Tuple" => {
                let elems = args.iter().map(|a| resolve_type_name(pool, a)).collect::<Result<Vec<_>, _>>()?;
                pool.tuple_of(elems)
            }
            "Option" => {
                let elem = resolve_type_name(pool, args[0])?;
                pool.option_of(elem)
            }
            "Func" => {
                if args.is_empty() {
                    return Err(());
                }
                let ret = resolve_type_name(pool, args[0])?;
                let params = args[1..].iter().map(|a| resolve_type_name(pool, a)).collect::<Result<Vec<_>, _>>()?;
                pool.func_of(ret, params)
            }
            _ => return Err(()),
        }
    } else {
        pool.by_name(base).ok_or(())?
    };
    Ok(if optional { pool.option_of(ty) } else { ty })
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth -= 1,
            ',' if depth == 0 => {
                out.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(s[start..].trim());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_builtin_scalar() {
        let mut pool = TypePool::new();
        assert_eq!(resolve_type_name(&mut pool, "Int").unwrap(), pool.builtin.int);
    }

    #[test]
    fn resolves_array_template() {
        let mut pool = TypePool::new();
        let a = resolve_type_name(&mut pool, "Array<Int>").unwrap();
        assert_eq!(a, pool.array_of(pool.builtin.int));
    }

    #[test]
    fn resolves_option_suffix() {
        let mut pool = TypePool::new();
        let o = resolve_type_name(&mut pool, "Int?").unwrap();
        assert_eq!(o, pool.option_of(pool.builtin.int));
    }

    #[test]
    fn resolves_func_template() {
        let mut pool = TypePool::new();
        let f = resolve_type_name(&mut pool, "Func<Int,String,Boolean>").unwrap();
        assert_eq!(f, pool.func_of(pool.builtin.int, vec![pool.builtin.string, pool.builtin.boolean]));
    }
}
