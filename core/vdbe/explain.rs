use std::fmt::Write;

use super::opcodes::{BcArgType, BcOp};

fn readN(code: &[u8], pc: usize, n: usize) -> Option<u64> {
    let b = code.get(pc..pc + n)?;
    Some(b.iter().rev().fold(0u64, |acc, &c| (acc << 8) | c as u64))
}

fn argToStr(code: &[u8], pc: usize, arg: BcArgType, dict: &[String]) -> Option<String> {
    let x = readN(code, pc, arg.width().min(8))?;
    let s = match arg {
        BcArgType::K | BcArgType::S | BcArgType::V | BcArgType::B | BcArgType::H | BcArgType::L => {
            format!("{}[{}]", format!("{:?}", arg).to_lowercase(), x)
        }
        BcArgType::Dict => match dict.get(x as usize) {
            Some(d) => format!("{:?}", d),
            None => format!("dict[{}]", x),
        },
        BcArgType::AggSlot => format!("agg[{}]", x),
        BcArgType::Sym => format!("sym({})", x),
        BcArgType::LitRef => {
            let len = readN(code, pc + 4, 4)?;
            format!("lit({},{})", x & 0xffff_ffff, len)
        }
        BcArgType::ImmU8 | BcArgType::ImmU16 => format!("{}", x),
        BcArgType::ImmI64 => format!("{}", x as i64),
        BcArgType::ImmF64 => format!("{:?}", f64::from_bits(x)),
    };
    Some(s)
}

/// Human-readable listing of `code`, one instruction per line.
///
/// Decoding stops at the first malformed instruction, which is reported on
/// its own line.
pub fn disassemble(code: &[u8], dict: &[String]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "addr  opcode                  args");
    let _ = writeln!(out, "----  ----------------------  ----");
    let mut pc = 0;
    while pc < code.len() {
        let Some(op) = readN(code, pc, 2).and_then(|id| BcOp::fromId(id as u16)) else {
            let _ = writeln!(out, "{:<4}  <invalid>", pc);
            break;
        };
        let info = op.info();
        let start = pc;
        pc += 2;
        let mut args = vec![];
        let mut ok = true;
        for &arg in info.args {
            match argToStr(code, pc, arg, dict) {
                Some(s) => args.push(s),
                None => ok = false,
            }
            pc += arg.width();
        }
        if ok && !info.va.is_empty() {
            match readN(code, pc, 4) {
                Some(n) => {
                    pc += 4;
                    args.push(format!("#{}", n));
                    for _ in 0..n {
                        let mut tuple = vec![];
                        for &arg in info.va {
                            match argToStr(code, pc, arg, dict) {
                                Some(s) => tuple.push(s),
                                None => ok = false,
                            }
                            pc += arg.width();
                        }
                        args.push(format!("({})", tuple.join(" ")));
                    }
                }
                None => ok = false,
            }
        }
        if !ok {
            let _ = writeln!(out, "{:<4}  {:<22}  <truncated>", start, info.text);
            break;
        }
        let _ = writeln!(out, "{:<4}  {:<22}  {}", start, info.text, args.join(", "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassemble() {
        let mut code = vec![];
        code.extend(BcOp::LoadK.id().to_le_bytes());
        code.extend(4u16.to_le_bytes());
        code.extend(BcOp::CmpStrEqCs.id().to_le_bytes());
        code.extend(0u16.to_le_bytes());
        code.extend(BcOp::AddImmI.id().to_le_bytes());
        code.extend((-3i64).to_le_bytes());
        code.extend(BcOp::Ret.id().to_le_bytes());
        let text = disassemble(&code, &["abc".to_string()]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[1].starts_with("----"));
        assert!(lines[2].contains("loadk") && lines[2].contains("k[4]"));
        assert!(lines[3].contains("\"abc\""));
        assert!(lines[4].ends_with("-3"));
        assert!(lines[5].contains("ret"));
    }

    #[test]
    fn test_truncated() {
        let mut code = vec![];
        code.extend(BcOp::FindSym.id().to_le_bytes());
        code.push(1);
        let text = disassemble(&code, &[]);
        assert!(text.contains("<truncated>"));
    }
}
