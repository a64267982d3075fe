//! Parse textual context expressions into an [`ExprNode`] tree using PEST.

use crate::ast::*;
use crate::value::Value;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "expr.pest"]
struct ExpressionParser;

/// Parse expression source into a tree.
pub fn parse(source: &str) -> Result<ExprNode, String> {
    let pairs = ExpressionParser::parse(Rule::expression, source)
        .map_err(|e| format!("Parse error: {}", e))?;
    let expression = pairs.into_iter().next().ok_or("Empty parse")?;
    let expr = expression
        .into_inner()
        .next()
        .ok_or("expression: missing body")?;
    build_expr(expr)
}

fn build_expr(pair: Pair<Rule>) -> Result<ExprNode, String> {
    match pair.as_rule() {
        Rule::expr | Rule::and_expr | Rule::cmp_expr | Rule::sum | Rule::product => {
            build_left_assoc(pair)
        }
        Rule::not_expr => build_prefixed(pair, UnaryOp::Not),
        Rule::unary => build_prefixed(pair, UnaryOp::Neg),
        Rule::call => build_call(pair),
        Rule::path => build_path(pair),
        Rule::hex => {
            let digits = &pair.as_str()[2..];
            u64::from_str_radix(digits, 16)
                .map(integer_literal)
                .map_err(|e| format!("hex literal {}: {}", pair.as_str(), e))
        }
        Rule::int => pair
            .as_str()
            .parse::<u64>()
            .map(integer_literal)
            .map_err(|e| format!("int literal {}: {}", pair.as_str(), e)),
        Rule::float => pair
            .as_str()
            .parse::<f64>()
            .map(|x| ExprNode::Literal(Value::Double(x)))
            .map_err(|e| format!("float literal {}: {}", pair.as_str(), e)),
        Rule::string => {
            let chars = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(ExprNode::Literal(Value::Str(chars.to_string())))
        }
        Rule::boolean => Ok(ExprNode::Literal(Value::Bool(pair.as_str() == "true"))),
        Rule::none => Ok(ExprNode::Literal(Value::None)),
        other => Err(format!("unexpected rule {:?}", other)),
    }
}

fn integer_literal(x: u64) -> ExprNode {
    match i64::try_from(x) {
        Ok(x) => ExprNode::Literal(Value::I64(x)),
        Err(_) => ExprNode::Literal(Value::U64(x)),
    }
}

/// `operand (op operand)*` folded to the left.
fn build_left_assoc(pair: Pair<Rule>) -> Result<ExprNode, String> {
    let mut inner = pair.into_inner();
    let first = inner.next().ok_or("binary: missing operand")?;
    let mut lhs = build_expr(first)?;
    while let Some(op) = inner.next() {
        let op = binary_op(op.as_str())?;
        let rhs = build_expr(inner.next().ok_or("binary: missing right operand")?)?;
        lhs = ExprNode::Binary(op, Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn binary_op(symbol: &str) -> Result<BinaryOp, String> {
    Ok(match symbol {
        "or" | "||" => BinaryOp::Or,
        "and" | "&&" => BinaryOp::And,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "//" => BinaryOp::FloorDiv,
        "%" => BinaryOp::Mod,
        other => return Err(format!("unknown operator {}", other)),
    })
}

/// `op* operand`, applying the prefix operators innermost-last.
fn build_prefixed(pair: Pair<Rule>, op: UnaryOp) -> Result<ExprNode, String> {
    let mut pairs: Vec<_> = pair.into_inner().collect();
    let operand = pairs.pop().ok_or("unary: missing operand")?;
    let mut node = build_expr(operand)?;
    for _ in pairs {
        node = match (op, node) {
            (UnaryOp::Neg, ExprNode::Literal(Value::I64(x))) => ExprNode::Literal(Value::I64(-x)),
            (op, node) => ExprNode::Unary(op, Box::new(node)),
        };
    }
    Ok(node)
}

fn build_call(pair: Pair<Rule>) -> Result<ExprNode, String> {
    let mut inner = pair.into_inner();
    let name = inner.next().ok_or("call: missing name")?.as_str();
    let func = Function::from_name(name).ok_or_else(|| format!("unknown function {}", name))?;
    let args = inner.map(build_expr).collect::<Result<Vec<_>, _>>()?;
    if args.len() != 1 {
        return Err(format!("{}() takes exactly one argument, {} given", name, args.len()));
    }
    if func != Function::Len && !matches!(args[0], ExprNode::Path(_)) {
        return Err(format!("{}() expects a this... path argument", name));
    }
    Ok(ExprNode::Call(func, args))
}

fn build_path(pair: Pair<Rule>) -> Result<ExprNode, String> {
    let mut segments = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => segments.push(Segment::Key(inner.as_str().to_string())),
            Rule::index => {
                let i = inner
                    .as_str()
                    .parse()
                    .map_err(|e| format!("index {}: {}", inner.as_str(), e))?;
                segments.push(Segment::Index(i));
            }
            other => return Err(format!("path: unexpected rule {:?}", other)),
        }
    }
    Ok(ExprNode::Path(segments))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paths_with_index() {
        let node = parse("this._.items[2]").expect("parse");
        assert_eq!(
            node,
            ExprNode::Path(vec![
                Segment::Key("_".into()),
                Segment::Key("items".into()),
                Segment::Index(2),
            ])
        );
    }

    #[test]
    fn precedence_mul_over_add() {
        let node = parse("1 + this.n * 2").expect("parse");
        assert_eq!(node.to_string(), "(1 + (this.n * 2))");
    }

    #[test]
    fn negative_literal_folds() {
        assert_eq!(parse("-4").expect("parse"), ExprNode::Literal(Value::I64(-4)));
    }

    #[test]
    fn rejects_unknown_function() {
        assert!(parse("frobnicate(this.x)").is_err());
        assert!(parse("offset(3)").is_err());
    }
}
