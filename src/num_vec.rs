use core::ops::{Add, AddAssign, Div, Index, IndexMut, Mul, Neg, Sub, SubAssign};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};




/**
 * A statically-sized numeric vector over a generic scalar data type T, which
 * supports arithmetic operations also supported by T. Geometric vectors
 * (`Vector3`) and second-rank tensors (`Tensor`, row-major) are aliases of
 * this type.
 */
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vector<T, const DIM: usize> {
    data: [T; DIM]
}

pub type Vector3 = Vector<f64, 3>;
pub type Tensor = Vector<f64, 9>;




// ============================================================================
impl<T: Copy, const DIM: usize> Vector<T, DIM> {

    pub const fn new(data: [T; DIM]) -> Self {
        Self { data }
    }

    pub fn splat(x: T) -> Self {
        Self { data: [x; DIM] }
    }

    pub fn as_array(&self) -> &[T; DIM] {
        &self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }
}

impl<const DIM: usize> Vector<f64, DIM> {

    pub fn zero() -> Self {
        Self::splat(0.0)
    }

    /**
     * Inner product over all components.
     */
    pub fn dot(&self, other: &Self) -> f64 {
        self.data.iter().zip(other.data.iter()).map(|(a, b)| a * b).sum()
    }

    pub fn mag_sqr(&self) -> f64 {
        self.dot(self)
    }

    pub fn mag(&self) -> f64 {
        self.mag_sqr().sqrt()
    }

    pub fn cmpt_mul(&self, other: &Self) -> Self {
        let mut data = self.data;
        for (x, y) in data.iter_mut().zip(other.data.iter()) {
            *x *= y
        }
        Self { data }
    }
}

impl Vector3 {

    pub const fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self { data: [x, y, z] }
    }

    pub fn cross(&self, other: &Self) -> Self {
        let [a0, a1, a2] = self.data;
        let [b0, b1, b2] = other.data;
        Self::xyz(a1 * b2 - a2 * b1, a2 * b0 - a0 * b2, a0 * b1 - a1 * b0)
    }

    /**
     * Return the tensor `T_ij = a_i b_j`.
     */
    pub fn outer(&self, other: &Self) -> Tensor {
        let mut data = [0.0; 9];
        for i in 0..3 {
            for j in 0..3 {
                data[3 * i + j] = self.data[i] * other.data[j]
            }
        }
        Tensor::new(data)
    }

    /**
     * Return the vector `v_j = a_i T_ij`, i.e. this vector dotted into the
     * first index of the tensor.
     */
    pub fn dot_tensor(&self, t: &Tensor) -> Self {
        let mut data = [0.0; 3];
        for (j, x) in data.iter_mut().enumerate() {
            *x = (0..3).map(|i| self.data[i] * t.data[3 * i + j]).sum()
        }
        Self { data }
    }
}




// ============================================================================
impl<T, U, V, const DIM: usize> Add<Vector<U, DIM>> for Vector<T, DIM>
where
    T: Copy + Add<U, Output = V>,
    U: Copy,
    V: Copy + Default
{
    type Output = Vector<V, DIM>;

    fn add(self, other: Vector<U, DIM>) -> Self::Output {
        let mut data = [V::default(); DIM];

        for (i, x) in data.iter_mut().enumerate() {
            *x = self[i].add(other[i])
        }
        Self::Output { data }
    }
}

impl<T, U, V, const DIM: usize> Sub<Vector<U, DIM>> for Vector<T, DIM>
where
    T: Copy + Sub<U, Output = V>,
    U: Copy,
    V: Copy + Default
{
    type Output = Vector<V, DIM>;

    fn sub(self, other: Vector<U, DIM>) -> Self::Output {
        let mut data = [V::default(); DIM];

        for (i, x) in data.iter_mut().enumerate() {
            *x = self[i].sub(other[i])
        }
        Self::Output { data }
    }
}

impl<T, V, const DIM: usize> Mul<f64> for Vector<T, DIM>
where
    T: Copy + Mul<f64, Output = V>,
    V: Copy + Default
{
    type Output = Vector<V, DIM>;

    fn mul(self, other: f64) -> Self::Output {
        let mut data = [V::default(); DIM];

        for (i, x) in data.iter_mut().enumerate() {
            *x = self[i].mul(other)
        }
        Self::Output { data }
    }
}

impl<T, V, const DIM: usize> Div<f64> for Vector<T, DIM>
where
    T: Copy + Div<f64, Output = V>,
    V: Copy + Default
{
    type Output = Vector<V, DIM>;

    fn div(self, other: f64) -> Self::Output {
        let mut data = [V::default(); DIM];

        for (i, x) in data.iter_mut().enumerate() {
            *x = self[i].div(other)
        }
        Self::Output { data }
    }
}

impl<T: Copy + Neg<Output = T>, const DIM: usize> Neg for Vector<T, DIM> {
    type Output = Self;

    fn neg(self) -> Self {
        let mut data = self.data;
        data.iter_mut().for_each(|x| *x = -*x);
        Self { data }
    }
}

impl<T: Copy + AddAssign, const DIM: usize> AddAssign for Vector<T, DIM> {
    fn add_assign(&mut self, other: Self) {
        for (x, y) in self.data.iter_mut().zip(other.data) {
            *x += y
        }
    }
}

impl<T: Copy + SubAssign, const DIM: usize> SubAssign for Vector<T, DIM> {
    fn sub_assign(&mut self, other: Self) {
        for (x, y) in self.data.iter_mut().zip(other.data) {
            *x -= y
        }
    }
}

impl<T: Copy + Default, const DIM: usize> Default for Vector<T, DIM> {
    fn default() -> Self {
        Self { data: [T::default(); DIM] }
    }
}




// ============================================================================
impl<T, const DIM: usize> Index<usize> for Vector<T, DIM> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        &self.data[index]
    }
}

impl<T, const DIM: usize> IndexMut<usize> for Vector<T, DIM> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.data[index]
    }
}




// ============================================================================
impl<T: Serialize, const DIM: usize> Serialize for Vector<T, DIM> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.data.iter())
    }
}

impl<'de, T: Deserialize<'de>, const DIM: usize> Deserialize<'de> for Vector<T, DIM> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items: Vec<T> = Vec::deserialize(deserializer)?;
        let len = items.len();
        let data: [T; DIM] = items
            .try_into()
            .map_err(|_| D::Error::custom(format!("expected {} components, found {}", DIM, len)))?;
        Ok(Self { data })
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{Vector, Vector3};

    #[test]
    fn arithmetic_is_componentwise() {
        let a = Vector::new([1.0, 2.0, 3.0]);
        let b = Vector::new([4.0, 5.0, 6.0]);
        assert_eq!((a + b).as_array(), &[5.0, 7.0, 9.0]);
        assert_eq!((b - a).as_array(), &[3.0, 3.0, 3.0]);
        assert_eq!((a * 2.0).as_array(), &[2.0, 4.0, 6.0]);
        assert_eq!((-a).as_array(), &[-1.0, -2.0, -3.0]);
        assert_eq!(a.dot(&b), 32.0);
    }

    #[test]
    fn cross_product_is_right_handed() {
        let x = Vector3::xyz(1.0, 0.0, 0.0);
        let y = Vector3::xyz(0.0, 1.0, 0.0);
        assert_eq!(x.cross(&y), Vector3::xyz(0.0, 0.0, 1.0));
    }

    #[test]
    fn outer_product_contracts_back() {
        let a = Vector3::xyz(1.0, 0.0, 0.0);
        let b = Vector3::xyz(2.0, 3.0, 4.0);
        let t = a.outer(&b);
        assert_eq!(a.dot_tensor(&t), b);
    }

    #[test]
    fn serializes_as_a_plain_sequence() {
        let a = Vector3::xyz(1.0, -2.0, 0.5);
        let bytes = rmp_serde::encode::to_vec(&a).unwrap();
        let b: Vector3 = rmp_serde::decode::from_slice(&bytes).unwrap();
        assert_eq!(a, b);
    }
}
