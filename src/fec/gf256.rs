//! GF(256) arithmetic for the Reed-Solomon block code
//!
//! Field GF(2^8) with the reducing polynomial x^8 + x^4 + x^3 + x^2 + 1
//! (0x11D) and generator element 2. Log/exp tables are built at compile
//! time; the exp table is doubled so products of two logs index it without
//! a modulo.

const POLY: u16 = 0x11D;

const fn build_exp() -> [u8; 512] {
    let mut exp = [0u8; 512];
    let mut x: u16 = 1;
    let mut i = 0;
    while i < 255 {
        exp[i] = x as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= POLY;
        }
        i += 1;
    }
    let mut i = 255;
    while i < 512 {
        exp[i] = exp[i - 255];
        i += 1;
    }
    exp
}

const fn build_log(exp: &[u8; 512]) -> [u8; 256] {
    let mut log = [0u8; 256];
    let mut i = 0;
    while i < 255 {
        log[exp[i] as usize] = i as u8;
        i += 1;
    }
    log
}

const EXP: [u8; 512] = build_exp();
const LOG: [u8; 256] = build_log(&EXP);

/// alpha^p for p < 255
#[inline]
pub fn exp(p: usize) -> u8 {
    EXP[p % 255]
}

#[inline]
pub fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

#[inline]
pub fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        0
    } else {
        EXP[LOG[a as usize] as usize + LOG[b as usize] as usize]
    }
}

/// Multiplicative inverse. `a` must be non-zero.
#[inline]
pub fn inv(a: u8) -> u8 {
    debug_assert!(a != 0);
    EXP[255 - LOG[a as usize] as usize]
}

#[inline]
pub fn div(a: u8, b: u8) -> u8 {
    if a == 0 {
        0
    } else {
        mul(a, inv(b))
    }
}

/// dst ^= src * coeff, element-wise over whole symbols
pub fn mul_add_slice(dst: &mut [u8], src: &[u8], coeff: u8) {
    if coeff == 0 {
        return;
    }
    debug_assert_eq!(dst.len(), src.len());
    if coeff == 1 {
        for (d, &s) in dst.iter_mut().zip(src) {
            *d ^= s;
        }
        return;
    }
    let log_c = LOG[coeff as usize] as usize;
    for (d, &s) in dst.iter_mut().zip(src) {
        if s != 0 {
            *d ^= EXP[log_c + LOG[s as usize] as usize];
        }
    }
}

/// Invert a square matrix in place via Gauss-Jordan elimination.
///
/// Returns None if the matrix is singular. Rows are `k`-element slices of
/// `m`, which must hold exactly `k * k` entries.
pub fn invert_matrix(m: &mut [u8], k: usize) -> Option<Vec<u8>> {
    debug_assert_eq!(m.len(), k * k);
    let mut inv_m = vec![0u8; k * k];
    for i in 0..k {
        inv_m[i * k + i] = 1;
    }

    for col in 0..k {
        // Find a pivot row at or below `col`.
        let pivot = (col..k).find(|&r| m[r * k + col] != 0)?;
        if pivot != col {
            for c in 0..k {
                m.swap(pivot * k + c, col * k + c);
                inv_m.swap(pivot * k + c, col * k + c);
            }
        }

        let p = m[col * k + col];
        let p_inv = inv(p);
        for c in 0..k {
            m[col * k + c] = mul(m[col * k + c], p_inv);
            inv_m[col * k + c] = mul(inv_m[col * k + c], p_inv);
        }

        for r in 0..k {
            if r == col {
                continue;
            }
            let factor = m[r * k + col];
            if factor == 0 {
                continue;
            }
            for c in 0..k {
                let t = mul(m[col * k + c], factor);
                m[r * k + c] ^= t;
                let t = mul(inv_m[col * k + c], factor);
                inv_m[r * k + c] ^= t;
            }
        }
    }

    Some(inv_m)
}

/// Build the repair rows of a systematic code for `k` source and `m`
/// repair symbols.
///
/// Starts from the (k + m) x k Vandermonde matrix V[r][c] = alpha^(r c),
/// whose every k-row subset is invertible, and normalizes it so the first
/// k rows become the identity (the cm256/jerasure construction). Returned
/// are the last `m` rows, each of `k` coefficients.
pub fn systematic_repair_rows(k: usize, m: usize) -> Vec<Vec<u8>> {
    debug_assert!(k + m <= 255);

    // Top k x k of the Vandermonde matrix, inverted.
    let mut top = vec![0u8; k * k];
    for r in 0..k {
        for c in 0..k {
            top[r * k + c] = exp(r * c);
        }
    }
    let top_inv = invert_matrix(&mut top, k)
        .unwrap_or_else(|| unreachable!("Vandermonde submatrix is always invertible"));

    // Repair row j = V[k + j] * top_inv.
    (0..m)
        .map(|j| {
            let r = k + j;
            (0..k)
                .map(|c| {
                    let mut acc = 0u8;
                    for i in 0..k {
                        acc ^= mul(exp(r * i), top_inv[i * k + c]);
                    }
                    acc
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_axioms() {
        for a in 1..=255u8 {
            assert_eq!(mul(a, inv(a)), 1);
            assert_eq!(mul(a, 1), a);
            assert_eq!(mul(a, 0), 0);
        }
        // Spot-check commutativity and distributivity.
        for &(a, b, c) in &[(3u8, 7u8, 200u8), (0x53, 0xCA, 1), (255, 254, 253)] {
            assert_eq!(mul(a, b), mul(b, a));
            assert_eq!(mul(a, add(b, c)), add(mul(a, b), mul(a, c)));
        }
    }

    #[test]
    fn test_invert_identity() {
        let mut m = vec![0u8; 9];
        m[0] = 1;
        m[4] = 1;
        m[8] = 1;
        let inv_m = invert_matrix(&mut m, 3).unwrap();
        assert_eq!(inv_m, vec![1, 0, 0, 0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_invert_singular() {
        // Two equal rows.
        let mut m = vec![1, 2, 1, 2, 5, 6, 7, 8, 9];
        m[3] = m[0];
        m[4] = m[1];
        m[5] = m[2];
        assert!(invert_matrix(&mut m, 3).is_none());
    }

    #[test]
    fn test_invert_roundtrip() {
        let orig: Vec<u8> = vec![1, 2, 3, 4, 5, 6, 8, 10, 13];
        let mut m = orig.clone();
        let inv_m = invert_matrix(&mut m, 3).unwrap();

        // orig * inv == identity
        for r in 0..3 {
            for c in 0..3 {
                let mut acc = 0u8;
                for i in 0..3 {
                    acc ^= mul(orig[r * 3 + i], inv_m[i * 3 + c]);
                }
                assert_eq!(acc, u8::from(r == c));
            }
        }
    }

    #[test]
    fn test_repair_rows_shape() {
        let rows = systematic_repair_rows(8, 4);
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.len() == 8));
        // Repair rows of a systematic MDS code have no zero coefficients.
        assert!(rows.iter().all(|r| r.iter().all(|&c| c != 0)));
    }
}
