use std::fmt::{self, Debug, Display};

use crate::core::LinearParams;

/// Prints a linear parameter owner as `y = [W] x + [b]`, one weight row per line.
pub struct PrettyPrintLinear<'a> {
    params: &'a LinearParams,
    precision: usize,
}

impl<'a> PrettyPrintLinear<'a> {
    pub fn new(params: &'a LinearParams) -> Self {
        Self { params, precision: 4 }
    }

    /// Digits after the decimal point, `4` by default.
    pub fn precision(self, precision: usize) -> Self {
        Self { precision, ..self }
    }
}

impl Debug for PrettyPrintLinear<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}

fn write_element(f: &mut fmt::Formatter, element: f64, precision: usize) -> fmt::Result {
    if element.is_sign_positive() {
        write!(f, " {element:.precision$}")
    } else {
        write!(f, "{element:.precision$}")
    }
}

impl Display for PrettyPrintLinear<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let w = self.params.weights();
        let b = self.params.bias();
        let n = self.params.n_outputs();
        let center_line = n / 2;
        for i_line in 0..n {
            if i_line == center_line {
                write!(f, "y = [")?;
            } else {
                write!(f, "    [")?;
            }
            let mut iter = w.row(i_line).iter().peekable();
            while let Some(&element) = iter.next() {
                write_element(f, element, self.precision)?;
                if iter.peek().is_some() {
                    write!(f, " ")?;
                }
            }
            write!(f, "]")?;
            if i_line == center_line {
                write!(f, " x + [")?;
            } else {
                write!(f, "     [")?;
            }
            write_element(f, b[i_line], self.precision)?;
            write!(f, "]")?;
            if i_line != n - 1 {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
