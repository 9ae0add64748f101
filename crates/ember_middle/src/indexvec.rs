use std::marker::PhantomData;

use thin_vec::ThinVec;

pub trait Index: Copy + TryFrom<usize> + Into<usize> {}

/// A vector that can only be indexed by its typed index `I`
#[derive(Debug, Clone)]
pub struct IndexThinVec<T, I>(ThinVec<T>, PhantomData<I>);

impl<T, I: Index> IndexThinVec<T, I> {
    pub fn new() -> Self {
        Self(ThinVec::new(), PhantomData)
    }

    pub fn try_push(&mut self, element: T) -> Result<I, <I as TryFrom<usize>>::Error> {
        let index = I::try_from(self.0.len())?;
        self.0.push(element);
        Ok(index)
    }

    pub fn get(&self, index: I) -> Option<&T> {
        self.0.get(index.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    pub fn iter_enumerated(&self) -> impl Iterator<Item = (I, &T)> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, v)| I::try_from(i).ok().map(|i| (i, v)))
    }
}

impl<T, I: Index> std::ops::Index<I> for IndexThinVec<T, I> {
    type Output = T;

    fn index(&self, index: I) -> &Self::Output {
        &self.0[Into::<usize>::into(index)]
    }
}

impl<T, I: Index> std::ops::IndexMut<I> for IndexThinVec<T, I> {
    fn index_mut(&mut self, index: I) -> &mut Self::Output {
        &mut self.0[Into::<usize>::into(index)]
    }
}

impl<T, I> Default for IndexThinVec<T, I> {
    fn default() -> Self {
        Self(ThinVec::default(), PhantomData)
    }
}

#[macro_export]
macro_rules! index_type {
    ($(#[$attr:meta])* $name:ident $repr:ty) => {
        $(#[$attr])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub $repr);

        impl TryFrom<usize> for $name {
            type Error = <$repr as TryFrom<usize>>::Error;

            fn try_from(value: usize) -> Result<Self, Self::Error> {
                Ok(Self(<$repr>::try_from(value)?))
            }
        }
        impl From<$name> for usize {
            fn from(v: $name) -> usize {
                v.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }

        impl $crate::indexvec::Index for $name {}
    };
}
