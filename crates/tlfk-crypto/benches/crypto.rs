use tlfk_crypto::{
    decrypt_client_half, encrypt_client_half, CryptPrivateKey, TlfCryptKeyClientHalf,
    TlfEphemeralPrivateKey,
};

#[divan::bench]
fn bench_encrypt_client_half(bencher: divan::Bencher) {
    let device = CryptPrivateKey::generate().public_key();
    let ephemeral = TlfEphemeralPrivateKey::generate();
    let half = TlfCryptKeyClientHalf::generate();
    bencher.bench(|| {
        encrypt_client_half(
            divan::black_box(&ephemeral),
            divan::black_box(&device),
            divan::black_box(&half),
        )
        .unwrap()
    });
}

#[divan::bench]
fn bench_decrypt_client_half(bencher: divan::Bencher) {
    let device = CryptPrivateKey::generate();
    let ephemeral = TlfEphemeralPrivateKey::generate();
    let half = TlfCryptKeyClientHalf::generate();
    let wrapped = encrypt_client_half(&ephemeral, &device.public_key(), &half).unwrap();
    let ephemeral_public = ephemeral.public_key();
    bencher.bench(|| {
        decrypt_client_half(
            divan::black_box(&device),
            divan::black_box(&ephemeral_public),
            divan::black_box(&wrapped),
        )
        .unwrap()
    });
}

fn main() {
    divan::main();
}
