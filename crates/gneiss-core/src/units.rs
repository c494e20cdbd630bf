macro_rules! def_units {
    ($t: ident, $doc: literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
        pub struct $t<T>(pub T);

        impl<T> $t<T> {
            pub fn into_inner(self) -> T {
                self.0
            }

            pub fn map<S>(self, mut f: impl FnMut(T) -> S) -> $t<S> {
                $t(f(self.0))
            }

            pub fn combine<S, R>(u1: Self, u2: $t<S>, mut f: impl FnMut(T, S) -> R) -> $t<R> {
                $t(f(u1.into_inner(), u2.into_inner()))
            }
        }
    };
}

def_units!(VoxelUnits, "Denotes that the inner `T` is given in units of global (zoom step 0) voxels.");
def_units!(BucketUnits, "Denotes that the inner `T` is given in units of buckets at some zoom step.");
