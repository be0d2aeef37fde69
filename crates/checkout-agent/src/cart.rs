//! Kiosk cart: scanned lines, reconciliation against the detected object
//! count, and the gate that decides whether payment may proceed.

use checkout_common::Product;
use serde::Serialize;

use crate::error::{AgentError, AgentResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartLine {
    pub product: Product,
    /// Always at least one.
    pub quantity: u32,
}

impl CartLine {
    pub fn subtotal(&self) -> f64 {
        self.product.price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Match,
    Mismatch { scanned: u32, detected: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckoutGate {
    #[default]
    AwaitingDetection,
    Ready,
    /// Scanned and detected counts disagree.
    Blocked { scanned: u32, detected: u32 },
    /// The customer confirmed a mismatch and may pay anyway.
    Acknowledged,
}

#[derive(Debug, Clone, Default)]
pub struct Cart {
    lines: Vec<CartLine>,
    gate: CheckoutGate,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one unit of `product`, returning the line's new quantity.
    pub fn record_scan(&mut self, product: Product) -> u32 {
        self.gate = CheckoutGate::AwaitingDetection;
        if let Some(line) = self.line_mut(&product.barcode) {
            line.quantity = line.quantity.saturating_add(1);
            return line.quantity;
        }
        self.lines.push(CartLine {
            product,
            quantity: 1,
        });
        1
    }

    /// Change a line's quantity by `delta`. Returns the new quantity, or
    /// `None` when the line dropped to zero and was removed.
    pub fn adjust_quantity(&mut self, barcode: &str, delta: i64) -> AgentResult<Option<u32>> {
        let index = self
            .lines
            .iter()
            .position(|line| line.product.barcode == barcode)
            .ok_or_else(|| AgentError::Catalog(format!("barcode {barcode} is not in the cart")))?;

        self.gate = CheckoutGate::AwaitingDetection;
        let next = i64::from(self.lines[index].quantity).saturating_add(delta);
        if next <= 0 {
            self.lines.remove(index);
            return Ok(None);
        }
        let quantity = u32::try_from(next).unwrap_or(u32::MAX);
        self.lines[index].quantity = quantity;
        Ok(Some(quantity))
    }

    pub fn remove(&mut self, barcode: &str) -> Option<CartLine> {
        let index = self
            .lines
            .iter()
            .position(|line| line.product.barcode == barcode)?;
        self.gate = CheckoutGate::AwaitingDetection;
        Some(self.lines.remove(index))
    }

    pub fn reset(&mut self) {
        self.lines.clear();
        self.gate = CheckoutGate::AwaitingDetection;
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn total_quantity(&self) -> u32 {
        self.lines
            .iter()
            .fold(0u32, |total, line| total.saturating_add(line.quantity))
    }

    pub fn total_price(&self) -> f64 {
        self.lines.iter().map(CartLine::subtotal).sum()
    }

    pub fn reconcile(&self, detected: u32) -> Reconciliation {
        let scanned = self.total_quantity();
        if scanned == detected {
            Reconciliation::Match
        } else {
            Reconciliation::Mismatch { scanned, detected }
        }
    }

    /// Feed a detector result into the checkout gate.
    pub fn record_detection(&mut self, detected: u32) -> Reconciliation {
        let outcome = self.reconcile(detected);
        self.gate = match outcome {
            Reconciliation::Match => CheckoutGate::Ready,
            Reconciliation::Mismatch { scanned, detected } => {
                CheckoutGate::Blocked { scanned, detected }
            }
        };
        outcome
    }

    /// Accept a mismatch. Only meaningful while blocked.
    pub fn acknowledge(&mut self) -> bool {
        if matches!(self.gate, CheckoutGate::Blocked { .. }) {
            self.gate = CheckoutGate::Acknowledged;
            true
        } else {
            false
        }
    }

    pub fn gate(&self) -> CheckoutGate {
        self.gate
    }

    pub fn can_pay(&self) -> bool {
        !self.is_empty() && matches!(self.gate, CheckoutGate::Ready | CheckoutGate::Acknowledged)
    }

    fn line_mut(&mut self, barcode: &str) -> Option<&mut CartLine> {
        self.lines
            .iter_mut()
            .find(|line| line.product.barcode == barcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(barcode: &str, price: f64) -> Product {
        Product {
            id: format!("p-{barcode}"),
            barcode: barcode.to_string(),
            name: format!("Item {barcode}"),
            price,
            image: None,
        }
    }

    #[test]
    fn test_repeat_scan_increments_line() {
        let mut cart = Cart::new();
        assert_eq!(cart.record_scan(product("8801234567890", 1.5)), 1);
        assert_eq!(cart.record_scan(product("8801234567890", 1.5)), 2);
        assert_eq!(cart.record_scan(product("8809876543210", 3.0)), 1);

        assert_eq!(cart.lines().len(), 2);
        assert_eq!(cart.total_quantity(), 3);
        assert!((cart.total_price() - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_adjust_to_zero_removes_line() {
        let mut cart = Cart::new();
        cart.record_scan(product("8801234567890", 1.0));
        cart.record_scan(product("8801234567890", 1.0));

        assert_eq!(cart.adjust_quantity("8801234567890", -1).unwrap(), Some(1));
        assert_eq!(cart.adjust_quantity("8801234567890", -1).unwrap(), None);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_adjust_never_goes_negative() {
        let mut cart = Cart::new();
        cart.record_scan(product("8801234567890", 1.0));
        assert_eq!(cart.adjust_quantity("8801234567890", -5).unwrap(), None);
        assert!(cart.lines().iter().all(|line| line.quantity >= 1));
        assert!(cart.adjust_quantity("8801234567890", 1).is_err());
    }

    #[test]
    fn test_adjust_increases() {
        let mut cart = Cart::new();
        cart.record_scan(product("8801234567890", 2.0));
        assert_eq!(cart.adjust_quantity("8801234567890", 2).unwrap(), Some(3));
        assert!((cart.total_price() - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reconcile_counts() {
        let mut cart = Cart::new();
        cart.record_scan(product("8801234567890", 1.0));
        cart.record_scan(product("8801234567890", 1.0));
        cart.record_scan(product("8809876543210", 1.0));

        assert_eq!(cart.reconcile(3), Reconciliation::Match);
        assert_eq!(
            cart.reconcile(4),
            Reconciliation::Mismatch {
                scanned: 3,
                detected: 4
            }
        );
    }

    #[test]
    fn test_gate_blocks_until_acknowledged() {
        let mut cart = Cart::new();
        cart.record_scan(product("8801234567890", 1.0));
        assert!(!cart.can_pay());

        cart.record_detection(2);
        assert_eq!(
            cart.gate(),
            CheckoutGate::Blocked {
                scanned: 1,
                detected: 2
            }
        );
        assert!(!cart.can_pay());

        assert!(cart.acknowledge());
        assert!(cart.can_pay());
        assert!(!cart.acknowledge());
    }

    #[test]
    fn test_rescan_resets_gate() {
        let mut cart = Cart::new();
        cart.record_scan(product("8801234567890", 1.0));
        cart.record_detection(2);

        cart.record_scan(product("8801234567890", 1.0));
        assert_eq!(cart.gate(), CheckoutGate::AwaitingDetection);
        assert_eq!(cart.record_detection(2), Reconciliation::Match);
        assert!(cart.can_pay());
    }

    #[test]
    fn test_remove_and_reset() {
        let mut cart = Cart::new();
        cart.record_scan(product("8801234567890", 1.0));
        cart.record_scan(product("8809876543210", 1.0));

        let removed = cart.remove("8801234567890").unwrap();
        assert_eq!(removed.quantity, 1);
        assert!(cart.remove("8801234567890").is_none());

        cart.record_detection(1);
        cart.reset();
        assert!(cart.is_empty());
        assert_eq!(cart.gate(), CheckoutGate::AwaitingDetection);
        assert!(!cart.can_pay());
    }

    #[test]
    fn test_quantities_stay_positive_under_random_operations() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        use std::collections::HashMap;

        let barcodes = ["111", "222", "333", "444"];
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut cart = Cart::new();
        let mut expected: HashMap<&str, i64> = HashMap::new();

        for step in 0..2_000 {
            let barcode = barcodes[rng.gen_range(0..barcodes.len())];
            match rng.gen_range(0..10) {
                0..=4 => {
                    cart.record_scan(product(barcode, 1.0));
                    *expected.entry(barcode).or_insert(0) += 1;
                }
                5..=7 => {
                    let delta = rng.gen_range(-3..=3);
                    let result = cart.adjust_quantity(barcode, delta);
                    match expected.get_mut(barcode) {
                        Some(quantity) => {
                            *quantity += delta;
                            if *quantity <= 0 {
                                expected.remove(barcode);
                                assert_eq!(result.unwrap(), None);
                            } else {
                                assert_eq!(result.unwrap(), Some(*quantity as u32));
                            }
                        }
                        None => assert!(result.is_err()),
                    }
                }
                8 => {
                    let removed = cart.remove(barcode);
                    assert_eq!(removed.is_some(), expected.remove(barcode).is_some());
                }
                _ => {
                    if rng.gen_bool(0.2) {
                        cart.reset();
                        expected.clear();
                    }
                }
            }

            assert!(
                cart.lines().iter().all(|line| line.quantity >= 1),
                "zero quantity after step {step}"
            );
            let sum: u32 = cart.lines().iter().map(|line| line.quantity).sum();
            assert_eq!(cart.total_quantity(), sum);
            assert_eq!(i64::from(sum), expected.values().sum::<i64>());
            assert_eq!(cart.lines().len(), expected.len());
            for line in cart.lines() {
                assert_eq!(
                    i64::from(line.quantity),
                    expected[line.product.barcode.as_str()]
                );
            }
        }
    }
}
