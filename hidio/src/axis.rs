//! Logical axis sources.
//!
//! Analog report fields (gamepad axes, trigger values, plunger inputs)
//! are wired to physical quantities through small expressions given as
//! configuration strings, e.g.:
//!
//! ```text
//! nudge.x
//! negate(plunger.z)
//! scale(offset(nudge.vy, 100), 0.5)
//! sine(2000, 500)
//! ads1115_1[2]
//! ```
//!
//! An expression parses into a fixed-capacity node pool (no allocator
//! on the target) and evaluates against an [`AxisEnv`], which supplies
//! the live subsystem readings for the reporting device's view of the
//! world. Sensor drivers expose extra named atoms through a
//! [`SourceRegistry`] populated at configuration time.
//!
//! Parse failures are logged by the caller and yield the null source,
//! so a typo in the configuration maps an axis to a constant zero
//! instead of wedging the device.

use crate::clip_i16;
use arrayvec::ArrayVec;
use libm::{roundf, sinf};

/// Maximum nodes per expression; combinators nest within this budget.
pub const MAX_NODES: usize = 16;

const PI: f32 = 3.14159265;

/// One node of a parsed expression. Child links are indices into the
/// owning expression's pool.
#[derive(Copy, Clone, Debug, PartialEq)]
enum Node {
    /// Constant zero; the placeholder for unmapped axes.
    Null,
    NudgeX,
    NudgeY,
    NudgeZ,
    NudgeVx,
    NudgeVy,
    NudgeVz,
    PlungerRaw,
    PlungerZ,
    PlungerZ0,
    PlungerSpeed,
    Negate(u8),
    Offset(u8, i32),
    Scale(u8, f32),
    Abs(u8),
    Sine { period_us: u32, phase_us: u32 },
    /// Device-registered source, resolved to a registry slot at parse
    /// time.
    Device(u8),
}

/// Live readings an expression evaluates against. Each reporting
/// device passes its own implementation, so accelerometer reads go
/// through that device's averaging view.
pub trait AxisEnv {
    fn now_us(&self) -> u64;
    /// Averaged accelerometer snapshot (x, y, z) for this report.
    fn nudge(&self) -> (i16, i16, i16);
    /// Integrated cabinet velocity (x, y, z).
    fn nudge_velocity(&self) -> (i16, i16, i16);
    /// Raw plunger sensor reading on its unsigned native scale.
    fn plunger_raw(&self) -> u16;
    fn plunger_z(&self) -> i16;
    fn plunger_z0(&self) -> i16;
    fn plunger_speed(&self) -> i16;
    /// Reading from a device-registered source slot.
    fn device(&self, slot: u8) -> i16 {
        let _ = slot;
        0
    }
}

/// Name table for sources registered by sensor drivers at
/// configuration time (ADC channels and the like).
pub trait SourceRegistry {
    fn resolve(&self, name: &str) -> Option<u8>;
}

/// Registry with no device sources.
pub struct NoSources;

impl SourceRegistry for NoSources {
    fn resolve(&self, _name: &str) -> Option<u8> {
        None
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Empty input or nothing recognizable at the front.
    Empty,
    /// Unrecognized source name.
    UnknownName,
    /// Malformed argument list.
    Syntax,
    /// Missing or malformed numeric argument.
    BadNumber,
    /// Unterminated quoted string.
    Unterminated,
    /// Expression exceeds the node budget.
    TooDeep,
}

/// Leftover input after a recognized expression; reported as a warning
/// but tolerated, matching long-standing config-file behavior.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TrailingText;

/// A parsed, evaluable axis expression.
#[derive(Clone, Debug)]
pub struct AxisExpr {
    nodes: ArrayVec<[Node; MAX_NODES]>,
    root: u8,
}

impl AxisExpr {
    /// The constant-zero source.
    pub fn null() -> Self {
        let mut nodes = ArrayVec::new();
        nodes.push(Node::Null);
        AxisExpr { nodes, root: 0 }
    }

    /// Parses an expression. On success also reports whether trailing
    /// text was ignored, so the caller can log it.
    pub fn parse(
        s: &str,
        registry: &dyn SourceRegistry,
    ) -> Result<(AxisExpr, Option<TrailingText>), ParseError> {
        let mut p = Cursor::new(s);
        let mut nodes = ArrayVec::new();
        let root = parse_expr(&mut p, &mut nodes, registry)?;
        p.skip_ws();
        let trailing = if p.at_end() { None } else { Some(TrailingText) };
        Ok((AxisExpr { nodes, root }, trailing))
    }

    /// Parses, falling back to the null source on error. The error (or
    /// trailing-text warning) comes back for the caller's log.
    pub fn parse_or_null(
        s: &str,
        registry: &dyn SourceRegistry,
    ) -> (AxisExpr, Result<Option<TrailingText>, ParseError>) {
        match AxisExpr::parse(s, registry) {
            Ok((expr, warn)) => (expr, Ok(warn)),
            Err(e) => (AxisExpr::null(), Err(e)),
        }
    }

    /// Reads the current value on the signed 16-bit axis scale.
    pub fn read_i16(&self, env: &dyn AxisEnv) -> i16 {
        self.eval(self.root, env)
    }

    /// Reads the positive half of the axis scaled to 8 bits, for byte
    /// fields like trigger positions.
    pub fn read_u8(&self, env: &dyn AxisEnv) -> u8 {
        let v = self.read_i16(env);
        if v < 0 {
            0
        } else {
            (v >> 7) as u8
        }
    }

    fn eval(&self, idx: u8, env: &dyn AxisEnv) -> i16 {
        match self.nodes[idx as usize] {
            Node::Null => 0,
            Node::NudgeX => env.nudge().0,
            Node::NudgeY => env.nudge().1,
            Node::NudgeZ => env.nudge().2,
            Node::NudgeVx => env.nudge_velocity().0,
            Node::NudgeVy => env.nudge_velocity().1,
            Node::NudgeVz => env.nudge_velocity().2,
            // The raw scale is unsigned 16-bit; halve it onto the
            // positive side of the signed axis.
            Node::PlungerRaw => (env.plunger_raw() / 2) as i16,
            Node::PlungerZ => env.plunger_z(),
            Node::PlungerZ0 => env.plunger_z0(),
            Node::PlungerSpeed => env.plunger_speed(),
            Node::Negate(c) => clip_i16(-(self.eval(c, env) as i32)),
            Node::Offset(c, k) => clip_i16(self.eval(c, env) as i32 + k),
            Node::Scale(c, f) => {
                let v = self.eval(c, env) as f32 * f;
                if v < -32768.0 {
                    -32768
                } else if v > 32767.0 {
                    32767
                } else {
                    v as i16
                }
            }
            Node::Abs(c) => clip_i16((self.eval(c, env) as i32).abs()),
            Node::Sine {
                period_us,
                phase_us,
            } => {
                let period = period_us.max(1) as u64;
                let t = (env.now_us() + phase_us as u64) % period;
                let angle = t as f32 * 2.0 * PI / period as f32;
                roundf(32767.0 * sinf(angle)) as i16
            }
            Node::Device(slot) => env.device(slot),
        }
    }
}

// --- parser -----------------------------------------------------------------

struct Cursor<'a> {
    s: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Cursor { s: s.as_bytes(), pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.s.get(self.pos).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn at_end(&self) -> bool {
        self.pos >= self.s.len()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Scans a source name: everything up to whitespace, '(', ',' or
    /// ')'. Brackets are legal name characters ("ads1115_1[2]").
    fn scan_name(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() || c == b'(' || c == b',' || c == b')' {
                break;
            }
            self.bump();
        }
        // Names are scanned on ASCII boundaries, so the slice is
        // valid UTF-8.
        core::str::from_utf8(&self.s[start..self.pos]).unwrap_or("")
    }

    /// Skips one argument we don't interpret: a quoted string, or a
    /// token running to the next ',' or ')' with nested parentheses
    /// and quotes balanced.
    fn skip_argument(&mut self) -> Result<(), ParseError> {
        self.skip_ws();
        match self.peek() {
            Some(q) if q == b'"' || q == b'\'' => {
                self.bump();
                while let Some(c) = self.peek() {
                    self.bump();
                    if c == q {
                        return Ok(());
                    }
                }
                Err(ParseError::Unterminated)
            }
            _ => {
                let mut depth = 0usize;
                while let Some(c) = self.peek() {
                    match c {
                        b'(' => depth += 1,
                        b')' => {
                            if depth == 0 {
                                return Ok(());
                            }
                            depth -= 1;
                        }
                        b',' if depth == 0 => return Ok(()),
                        b'"' | b'\'' => {
                            self.bump();
                            while let Some(cc) = self.peek() {
                                if cc == c {
                                    break;
                                }
                                self.bump();
                            }
                            if self.at_end() {
                                return Err(ParseError::Unterminated);
                            }
                        }
                        _ => {}
                    }
                    self.bump();
                }
                Ok(())
            }
        }
    }

    fn scan_f32(&mut self) -> Result<f32, ParseError> {
        self.skip_ws();
        let start = self.pos;
        if self.peek() == Some(b'-') || self.peek() == Some(b'+') {
            self.bump();
        }
        let mut seen_digit = false;
        let mut seen_dot = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                seen_digit = true;
                self.bump();
            } else if c == b'.' && !seen_dot {
                seen_dot = true;
                self.bump();
            } else {
                break;
            }
        }
        if !seen_digit {
            return Err(ParseError::BadNumber);
        }
        let txt = core::str::from_utf8(&self.s[start..self.pos]).unwrap_or("");
        txt.parse::<f32>().map_err(|_| ParseError::BadNumber)
    }

    fn scan_i32(&mut self) -> Result<i32, ParseError> {
        self.skip_ws();
        let start = self.pos;
        if self.peek() == Some(b'-') || self.peek() == Some(b'+') {
            self.bump();
        }
        let mut seen_digit = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                seen_digit = true;
                self.bump();
            } else {
                break;
            }
        }
        if !seen_digit {
            return Err(ParseError::BadNumber);
        }
        let txt = core::str::from_utf8(&self.s[start..self.pos]).unwrap_or("");
        txt.parse::<i32>().map_err(|_| ParseError::BadNumber)
    }
}

fn push_node(nodes: &mut ArrayVec<[Node; MAX_NODES]>, n: Node) -> Result<u8, ParseError> {
    let idx = nodes.len();
    nodes.try_push(n).map_err(|_| ParseError::TooDeep)?;
    Ok(idx as u8)
}

/// Parses `name` or `name(args...)`, appending nodes and returning the
/// root index of the parsed subtree.
fn parse_expr(
    p: &mut Cursor,
    nodes: &mut ArrayVec<[Node; MAX_NODES]>,
    registry: &dyn SourceRegistry,
) -> Result<u8, ParseError> {
    p.skip_ws();
    let name = p.scan_name();
    if name.is_empty() {
        return Err(ParseError::Empty);
    }
    p.skip_ws();

    // Leaf atoms first.
    let leaf = match name {
        "null" => Some(Node::Null),
        "nudge.x" => Some(Node::NudgeX),
        "nudge.y" => Some(Node::NudgeY),
        "nudge.z" => Some(Node::NudgeZ),
        "nudge.vx" => Some(Node::NudgeVx),
        "nudge.vy" => Some(Node::NudgeVy),
        "nudge.vz" => Some(Node::NudgeVz),
        "plunger.raw" => Some(Node::PlungerRaw),
        "plunger.z" => Some(Node::PlungerZ),
        "plunger.z0" => Some(Node::PlungerZ0),
        "plunger.speed" => Some(Node::PlungerSpeed),
        _ => None,
    };
    if let Some(node) = leaf {
        skip_ignored_args(p)?;
        return push_node(nodes, node);
    }

    match name {
        "negate" | "abs" => {
            if !p.eat(b'(') {
                return Err(ParseError::Syntax);
            }
            let child = parse_expr(p, nodes, registry)?;
            p.skip_ws();
            if !p.eat(b')') {
                return Err(ParseError::Syntax);
            }
            let node = if name == "negate" {
                Node::Negate(child)
            } else {
                Node::Abs(child)
            };
            push_node(nodes, node)
        }
        "offset" => {
            if !p.eat(b'(') {
                return Err(ParseError::Syntax);
            }
            let child = parse_expr(p, nodes, registry)?;
            p.skip_ws();
            if !p.eat(b',') {
                return Err(ParseError::Syntax);
            }
            let k = p.scan_i32()?;
            p.skip_ws();
            if !p.eat(b')') {
                return Err(ParseError::Syntax);
            }
            push_node(nodes, Node::Offset(child, k))
        }
        "scale" => {
            if !p.eat(b'(') {
                return Err(ParseError::Syntax);
            }
            let child = parse_expr(p, nodes, registry)?;
            p.skip_ws();
            if !p.eat(b',') {
                return Err(ParseError::Syntax);
            }
            let f = p.scan_f32()?;
            p.skip_ws();
            if !p.eat(b')') {
                return Err(ParseError::Syntax);
            }
            push_node(nodes, Node::Scale(child, f))
        }
        "sine" => {
            // sine(period_ms [, phase_ms])
            if !p.eat(b'(') {
                return Err(ParseError::Syntax);
            }
            let period_ms = p.scan_i32()?;
            if period_ms <= 0 {
                return Err(ParseError::BadNumber);
            }
            p.skip_ws();
            let phase_ms = if p.eat(b',') {
                let v = p.scan_i32()?;
                if v < 0 {
                    return Err(ParseError::BadNumber);
                }
                v
            } else {
                0
            };
            p.skip_ws();
            if !p.eat(b')') {
                return Err(ParseError::Syntax);
            }
            push_node(
                nodes,
                Node::Sine {
                    period_us: period_ms as u32 * 1000,
                    phase_us: phase_ms as u32 * 1000,
                },
            )
        }
        _ => {
            // A device-registered source; its argument list, if any,
            // is the driver's business (encoded in the registered
            // name), so we only need to scan past it.
            let slot = registry.resolve(name).ok_or(ParseError::UnknownName)?;
            skip_ignored_args(p)?;
            push_node(nodes, Node::Device(slot))
        }
    }
}

/// Skips an optional parenthesized argument list we don't interpret.
fn skip_ignored_args(p: &mut Cursor) -> Result<(), ParseError> {
    p.skip_ws();
    if !p.eat(b'(') {
        return Ok(());
    }
    loop {
        p.skip_ws();
        if p.eat(b')') {
            return Ok(());
        }
        if p.at_end() {
            return Err(ParseError::Syntax);
        }
        p.skip_argument()?;
        p.skip_ws();
        if p.eat(b',') {
            continue;
        }
        if p.eat(b')') {
            return Ok(());
        }
        if p.at_end() {
            return Err(ParseError::Syntax);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestEnv {
        now: u64,
    }

    impl AxisEnv for TestEnv {
        fn now_us(&self) -> u64 {
            self.now
        }
        fn nudge(&self) -> (i16, i16, i16) {
            (100, -200, 300)
        }
        fn nudge_velocity(&self) -> (i16, i16, i16) {
            (10, -20, 30)
        }
        fn plunger_raw(&self) -> u16 {
            40000
        }
        fn plunger_z(&self) -> i16 {
            12345
        }
        fn plunger_z0(&self) -> i16 {
            -5000
        }
        fn plunger_speed(&self) -> i16 {
            -30000
        }
        fn device(&self, slot: u8) -> i16 {
            1000 + slot as i16
        }
    }

    struct OneAdc;

    impl SourceRegistry for OneAdc {
        fn resolve(&self, name: &str) -> Option<u8> {
            match name {
                "ads1115_1[2]" => Some(3),
                _ => None,
            }
        }
    }

    fn parse(s: &str) -> AxisExpr {
        let (expr, result) = AxisExpr::parse_or_null(s, &NoSources);
        assert!(result.is_ok(), "parse of {:?} failed: {:?}", s, result);
        expr
    }

    #[test]
    fn leaf_atoms_read_through() {
        let env = TestEnv { now: 0 };
        assert_eq!(parse("nudge.x").read_i16(&env), 100);
        assert_eq!(parse("nudge.y").read_i16(&env), -200);
        assert_eq!(parse("nudge.vz").read_i16(&env), 30);
        assert_eq!(parse("plunger.z").read_i16(&env), 12345);
        assert_eq!(parse("plunger.z0").read_i16(&env), -5000);
        assert_eq!(parse("plunger.raw").read_i16(&env), 20000);
        assert_eq!(parse("null").read_i16(&env), 0);
    }

    #[test]
    fn combinators_compose() {
        let env = TestEnv { now: 0 };
        assert_eq!(parse("negate(nudge.x)").read_i16(&env), -100);
        assert_eq!(parse("abs(plunger.z0)").read_i16(&env), 5000);
        assert_eq!(parse("offset(nudge.x, -150)").read_i16(&env), -50);
        assert_eq!(parse("scale(plunger.z, 0.5)").read_i16(&env), 6172);
        assert_eq!(
            parse("scale( offset( negate(nudge.y), 100 ), 2 )").read_i16(&env),
            600
        );
    }

    #[test]
    fn arithmetic_saturates() {
        let env = TestEnv { now: 0 };
        assert_eq!(parse("offset(plunger.z, 32000)").read_i16(&env), 32767);
        assert_eq!(parse("scale(plunger.speed, 100)").read_i16(&env), -32768);
        assert_eq!(parse("negate(scale(plunger.speed, 100))").read_i16(&env), 32767);
    }

    #[test]
    fn sine_hits_the_quarter_points() {
        let expr = parse("sine(2000)");
        assert_eq!(expr.read_i16(&TestEnv { now: 0 }), 0);
        assert_eq!(expr.read_i16(&TestEnv { now: 500_000 }), 32767);
        assert_eq!(expr.read_i16(&TestEnv { now: 1_000_000 }), 0);
        assert_eq!(expr.read_i16(&TestEnv { now: 1_500_000 }), -32767);
        // Phase shifts by a quarter period.
        let expr = parse("sine(2000, 500)");
        assert_eq!(expr.read_i16(&TestEnv { now: 0 }), 32767);
    }

    #[test]
    fn read_u8_takes_positive_half() {
        let env = TestEnv { now: 0 };
        assert_eq!(parse("plunger.z").read_u8(&env), (12345 >> 7) as u8);
        assert_eq!(parse("plunger.z0").read_u8(&env), 0);
    }

    #[test]
    fn registry_sources_resolve() {
        let env = TestEnv { now: 0 };
        let (expr, result) = AxisExpr::parse_or_null("ads1115_1[2]", &OneAdc);
        assert!(result.is_ok());
        assert_eq!(expr.read_i16(&env), 1003);
    }

    #[test]
    fn unknown_name_falls_back_to_null() {
        let env = TestEnv { now: 0 };
        let (expr, result) = AxisExpr::parse_or_null("nudge.w", &NoSources);
        assert_eq!(result, Err(ParseError::UnknownName));
        assert_eq!(expr.read_i16(&env), 0);
    }

    #[test]
    fn syntax_errors_fall_back_to_null() {
        for s in &["negate(nudge.x", "offset(nudge.x)", "scale(nudge.x, x)", "sine()"] {
            let (expr, result) = AxisExpr::parse_or_null(s, &NoSources);
            assert!(result.is_err(), "{:?} parsed", s);
            assert_eq!(expr.read_i16(&TestEnv { now: 0 }), 0);
        }
    }

    #[test]
    fn trailing_text_is_tolerated_with_warning() {
        let (expr, result) = AxisExpr::parse_or_null("nudge.x garbage", &NoSources);
        assert_eq!(result, Ok(Some(TrailingText)));
        assert_eq!(expr.read_i16(&TestEnv { now: 0 }), 100);
    }

    #[test]
    fn quoted_and_nested_device_args_are_skipped() {
        struct Named;
        impl SourceRegistry for Named {
            fn resolve(&self, name: &str) -> Option<u8> {
                if name == "custom" {
                    Some(0)
                } else {
                    None
                }
            }
        }
        let (_, result) = AxisExpr::parse_or_null("custom('a, b', inner(1, 2))", &Named);
        assert_eq!(result, Ok(None));
    }

    #[test]
    fn node_budget_is_enforced() {
        // 20 nested negates blow the 16-node pool.
        let mut s = std::string::String::new();
        for _ in 0..20 {
            s.push_str("negate(");
        }
        s.push_str("nudge.x");
        for _ in 0..20 {
            s.push(')');
        }
        let (expr, result) = AxisExpr::parse_or_null(&s, &NoSources);
        assert_eq!(result, Err(ParseError::TooDeep));
        assert_eq!(expr.read_i16(&TestEnv { now: 0 }), 0);
    }
}
